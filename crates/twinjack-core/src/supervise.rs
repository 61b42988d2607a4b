//! Generic lifecycle supervision for one externally spawned service.
//!
//! `start` renders nothing itself: it receives a fully built [`ServiceSpec`]
//! (command line plus readiness probe) and drives spawn, readiness wait,
//! and failure handling. `stop` is idempotent and always bounded:
//! graceful signal, grace period, forced kill.

use std::time::Duration;

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ServiceHealthError, ServiceStartError};
use crate::runner::{ProcessId, ProcessRunner, Readiness, ServiceCommand};
use crate::types::{ProcessState, ServiceKind};

/// Everything needed to start and supervise one service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub kind: ServiceKind,
    /// Process name used for stale-process sweeps before spawn.
    pub process_name: String,
    pub command: ServiceCommand,
    pub readiness: Readiness,
    pub start_timeout: Duration,
    pub readiness_poll: Duration,
    pub stop_grace: Duration,
    pub stop_force: Duration,
}

/// Live handle to a supervised service.
#[derive(Debug)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    pub state: ProcessState,
    pid: Option<ProcessId>,
    spec: ServiceSpec,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
}

impl ServiceHandle {
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }
}

/// Health check policy: `failures` consecutive probe failures within
/// `window` promote a running service to `Failed`.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub failures: u32,
    pub window: Duration,
}

pub struct ServiceSupervisor {
    runner: Arc<dyn ProcessRunner>,
    health: HealthPolicy,
}

impl ServiceSupervisor {
    pub fn new(runner: Arc<dyn ProcessRunner>, health: HealthPolicy) -> Self {
        Self { runner, health }
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Spawn the service and wait for its readiness probe, bounded by the
    /// spec's start timeout. On timeout or early exit the process is killed
    /// and the handle never escapes in a half-started state.
    pub async fn start(&self, spec: ServiceSpec) -> Result<ServiceHandle, ServiceStartError> {
        let swept = self.runner.kill_stale(&spec.process_name);
        if swept > 0 {
            info!(service = %spec.kind, count = swept, "killed stale service processes");
        }

        info!(service = %spec.kind, program = %spec.command.program, "starting service");
        let pid = self
            .runner
            .spawn(&spec.process_name, &spec.command)
            .map_err(|err| ServiceStartError::Spawn {
                service: spec.kind,
                message: err.to_string(),
            })?;

        let mut handle = ServiceHandle {
            kind: spec.kind,
            state: ProcessState::Starting,
            pid: Some(pid),
            spec,
            consecutive_failures: 0,
            first_failure_at: None,
        };

        let started = Instant::now();
        loop {
            if !self.runner.alive(pid) {
                warn!(service = %handle.kind, "service exited during startup");
                handle.state = ProcessState::Failed;
                return Err(ServiceStartError::ExitedEarly { service: handle.kind });
            }
            if handle.spec.readiness.check(self.runner.as_ref(), pid) {
                break;
            }
            if started.elapsed() >= handle.spec.start_timeout {
                warn!(
                    service = %handle.kind,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "service readiness timeout; killing"
                );
                let _ = self.runner.terminate(pid);
                let _ = self.runner.kill(pid);
                handle.state = ProcessState::Failed;
                return Err(ServiceStartError::NotReady {
                    service: handle.kind,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(handle.spec.readiness_poll).await;
        }

        info!(
            service = %handle.spec.kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "service ready"
        );
        handle.state = ProcessState::Running;
        Ok(handle)
    }

    /// Idempotent, bounded stop: graceful signal, grace period, forced
    /// kill. Always leaves the handle in `Stopped`.
    pub async fn stop(&self, handle: &mut ServiceHandle) {
        if handle.state == ProcessState::Stopped {
            return;
        }
        let Some(pid) = handle.pid.take() else {
            handle.state = ProcessState::Stopped;
            return;
        };

        handle.state = ProcessState::Stopping;
        debug!(service = %handle.kind, "stopping service");

        if self.runner.alive(pid) {
            if let Err(err) = self.runner.terminate(pid) {
                warn!(service = %handle.kind, error = %err, "graceful signal failed");
            }
            let deadline = Instant::now() + handle.spec.stop_grace;
            while self.runner.alive(pid) && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        if self.runner.alive(pid) {
            warn!(service = %handle.kind, "service unresponsive; forcing termination");
            if let Err(err) = self.runner.kill(pid) {
                warn!(service = %handle.kind, error = %err, "forced kill failed");
            }
            let deadline = Instant::now() + handle.spec.stop_force;
            while self.runner.alive(pid) && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        handle.state = ProcessState::Stopped;
        info!(service = %handle.kind, "service stopped");
    }

    /// Non-blocking liveness probe. A run of consecutive failures inside
    /// the policy window promotes `Running -> Failed` and surfaces the
    /// condition; the coordinator decides what to do about it.
    pub fn health_check(&self, handle: &mut ServiceHandle) -> Result<(), ServiceHealthError> {
        if handle.state != ProcessState::Running {
            return Ok(());
        }
        let alive = handle.pid.map(|pid| self.runner.alive(pid)).unwrap_or(false);
        if alive {
            handle.consecutive_failures = 0;
            handle.first_failure_at = None;
            return Ok(());
        }

        let now = Instant::now();
        match handle.first_failure_at {
            Some(first) if now.duration_since(first) > self.health.window => {
                // Stale window; restart the count from this failure.
                handle.first_failure_at = Some(now);
                handle.consecutive_failures = 1;
            }
            Some(_) => handle.consecutive_failures += 1,
            None => {
                handle.first_failure_at = Some(now);
                handle.consecutive_failures = 1;
            }
        }

        debug!(
            service = %handle.kind,
            failures = handle.consecutive_failures,
            "health probe failed"
        );
        if handle.consecutive_failures >= self.health.failures {
            handle.state = ProcessState::Failed;
            return Err(ServiceHealthError::Unresponsive {
                service: handle.kind,
                failures: handle.consecutive_failures,
            });
        }
        Ok(())
    }

    /// One restart attempt: bounded stop, then a fresh start from the same
    /// spec.
    pub async fn restart(&self, handle: &mut ServiceHandle) -> Result<(), ServiceStartError> {
        info!(service = %handle.kind, "restarting service");
        self.stop(handle).await;
        *handle = self.start(handle.spec.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    fn spec(kind: ServiceKind) -> ServiceSpec {
        ServiceSpec {
            kind,
            process_name: "fakesvc".to_string(),
            command: ServiceCommand::new("fakesvc", vec!["-f".to_string()]),
            readiness: Readiness::ProcessAlive,
            start_timeout: Duration::from_millis(500),
            readiness_poll: Duration::from_millis(10),
            stop_grace: Duration::from_millis(200),
            stop_force: Duration::from_millis(100),
        }
    }

    fn supervisor(runner: Arc<FakeRunner>) -> ServiceSupervisor {
        ServiceSupervisor::new(
            runner,
            HealthPolicy {
                failures: 3,
                window: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test]
    async fn start_reaches_running() {
        let runner = Arc::new(FakeRunner::default());
        let sup = supervisor(runner.clone());
        let handle = sup.start(spec(ServiceKind::AccessPoint)).await.unwrap();
        assert_eq!(handle.state, ProcessState::Running);
        assert!(handle.pid().is_some());
    }

    #[tokio::test]
    async fn start_fails_when_process_exits_early() {
        let runner = Arc::new(FakeRunner::default());
        runner.exit_immediately();
        let sup = supervisor(runner.clone());
        let err = sup.start(spec(ServiceKind::DhcpDns)).await.unwrap_err();
        assert!(matches!(err, ServiceStartError::ExitedEarly { .. }));
    }

    #[tokio::test]
    async fn start_times_out_when_never_ready() {
        let runner = Arc::new(FakeRunner::default());
        let sup = supervisor(runner.clone());
        let mut s = spec(ServiceKind::AccessPoint);
        s.readiness = Readiness::MarkerFile(std::path::PathBuf::from("/nonexistent/marker"));
        let err = sup.start(s).await.unwrap_err();
        assert!(matches!(err, ServiceStartError::NotReady { .. }));
        // The straggler was killed.
        assert!(runner.kill_count() >= 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_bounded_for_unresponsive_process() {
        let runner = Arc::new(FakeRunner::default());
        runner.ignore_signals();
        let sup = supervisor(runner.clone());
        let mut handle = sup.start(spec(ServiceKind::AccessPoint)).await.unwrap();

        let started = std::time::Instant::now();
        sup.stop(&mut handle).await;
        let elapsed = started.elapsed();
        assert_eq!(handle.state, ProcessState::Stopped);
        // grace (200ms) + force (100ms) + scheduling slack
        assert!(elapsed < Duration::from_millis(900), "stop took {:?}", elapsed);

        // Second stop is a no-op.
        let term_count = runner.terminate_count();
        sup.stop(&mut handle).await;
        assert_eq!(runner.terminate_count(), term_count);
    }

    #[tokio::test]
    async fn health_check_promotes_to_failed_after_threshold() {
        let runner = Arc::new(FakeRunner::default());
        let sup = supervisor(runner.clone());
        let mut handle = sup.start(spec(ServiceKind::AccessPoint)).await.unwrap();

        runner.die(handle.pid().unwrap());
        assert!(sup.health_check(&mut handle).is_ok());
        assert!(sup.health_check(&mut handle).is_ok());
        let err = sup.health_check(&mut handle).unwrap_err();
        assert!(matches!(err, ServiceHealthError::Unresponsive { failures: 3, .. }));
        assert_eq!(handle.state, ProcessState::Failed);
    }

    #[tokio::test]
    async fn restart_yields_fresh_running_handle() {
        let runner = Arc::new(FakeRunner::default());
        let sup = supervisor(runner.clone());
        let mut handle = sup.start(spec(ServiceKind::DhcpDns)).await.unwrap();
        let first_pid = handle.pid().unwrap();

        runner.die(first_pid);
        sup.restart(&mut handle).await.unwrap();
        assert_eq!(handle.state, ProcessState::Running);
        assert_ne!(handle.pid().unwrap(), first_pid);
    }
}
