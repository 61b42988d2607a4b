//! Process spawn and signal management via `std::process` and `/proc`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use anyhow::Context;
use tracing::{debug, warn};

use twinjack_core::runner::{ProcessId, ProcessRunner, ServiceCommand};

/// Runs service binaries as detached children and signals them directly.
#[derive(Default)]
pub struct StdProcessRunner {
    children: Mutex<HashMap<u32, Child>>,
}

impl StdProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(pid: u32, signal: i32) -> anyhow::Result<()> {
        let rc = unsafe { libc::kill(pid as i32, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
                .with_context(|| format!("signalling pid {pid}"))
        }
    }
}

impl ProcessRunner for StdProcessRunner {
    fn spawn(&self, kind_name: &str, command: &ServiceCommand) -> anyhow::Result<ProcessId> {
        debug!(
            service = kind_name,
            program = %command.program,
            args = ?command.args,
            "spawning service process"
        );
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", command.program))?;
        let pid = child.id();
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);
        Ok(ProcessId(pid))
    }

    fn alive(&self, pid: ProcessId) -> bool {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = children.get_mut(&pid.0) {
            // try_wait also reaps the child once it has exited.
            match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(pid = pid.0, status = ?status.code(), "child exited");
                    children.remove(&pid.0);
                    false
                }
                Err(err) => {
                    warn!(pid = pid.0, error = %err, "try_wait failed");
                    false
                }
            }
        } else {
            // Not one of ours (e.g. after restart bookkeeping); probe with
            // signal 0.
            unsafe { libc::kill(pid.0 as i32, 0) == 0 }
        }
    }

    fn terminate(&self, pid: ProcessId) -> anyhow::Result<()> {
        Self::signal(pid.0, libc::SIGTERM)
    }

    fn kill(&self, pid: ProcessId) -> anyhow::Result<()> {
        Self::signal(pid.0, libc::SIGKILL)?;
        // Reap promptly so the pid does not linger as a zombie.
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut child) = children.remove(&pid.0) {
            let _ = child.wait();
        }
        Ok(())
    }

    fn kill_stale(&self, process_name: &str) -> usize {
        let own: Vec<u32> = {
            let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            children.keys().copied().collect()
        };
        let mut killed = 0;
        for pid in pids_by_comm(process_name) {
            if own.contains(&pid) {
                continue;
            }
            if Self::signal(pid, libc::SIGTERM).is_ok() {
                debug!(pid, name = process_name, "terminated stale process");
                killed += 1;
            }
        }
        killed
    }
}

/// Find PIDs whose `/proc/[pid]/comm` matches the name exactly.
fn pids_by_comm(name: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    let proc_dir = Path::new("/proc");
    let Ok(entries) = fs::read_dir(proc_dir) else {
        return pids;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Ok(pid) = file_name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        let comm_path = format!("/proc/{pid}/comm");
        if let Ok(comm) = fs::read_to_string(&comm_path) {
            if comm.trim() == name {
                pids.push(pid);
            }
        }
    }
    pids
}
