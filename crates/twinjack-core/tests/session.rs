//! End-to-end orchestration tests over fake collaborators: ordered
//! startup, failure-injection cleanup, bounded stop, health restarts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use twinjack_core::alloc::RoleRequest;
use twinjack_core::session::{Collaborators, Orchestrator, SessionOptions};
use twinjack_core::testing::{
    wired_iface, wireless_iface, FakeCaptureLauncher, FakeConfigWriter, FakeConnector,
    FakeDeauthSender, FakeLink, FakeProbe, FakeResolver, FakeRunner, RecordingRuleEngine,
};
use twinjack_core::types::{EncryptionKind, Phase, Role, TargetAp, VerificationStatus};
use twinjack_core::{OrchestratorConfig, SessionError};

struct Harness {
    orchestrator: Orchestrator,
    runner: Arc<FakeRunner>,
    engine: Arc<RecordingRuleEngine>,
    link: Arc<FakeLink>,
    capture: Arc<FakeCaptureLauncher>,
    _tmp: tempfile::TempDir,
}

fn config(tmp: &tempfile::TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        runtime_dir: tmp.path().to_path_buf(),
        start_timeout: Duration::from_millis(500),
        readiness_poll: Duration::from_millis(10),
        stop_grace: Duration::from_millis(200),
        stop_force: Duration::from_millis(100),
        health_tick: Duration::from_millis(50),
        health_window: Duration::from_secs(10),
        health_failures: 1,
        restart_window: Duration::from_secs(60),
        deauth_interval: Duration::from_millis(100),
        deauth_failures: 5,
        verify_timeout: Duration::from_millis(100),
        portal_port: 8080,
    }
}

fn harness_with(interfaces: Vec<twinjack_core::InterfaceInfo>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::default());
    let engine = Arc::new(RecordingRuleEngine::default());
    let link = Arc::new(FakeLink::default());
    let capture = Arc::new(FakeCaptureLauncher::default());
    let deps = Collaborators {
        runner: runner.clone(),
        probe: Arc::new(FakeProbe::with(interfaces)),
        config_writer: Arc::new(FakeConfigWriter),
        rule_engine: engine.clone(),
        link: link.clone(),
        deauth: Arc::new(FakeDeauthSender::default()),
        connector: Arc::new(FakeConnector::default()),
        resolver: Arc::new(FakeResolver::default()),
        capture: capture.clone(),
    };
    Harness {
        orchestrator: Orchestrator::new(config(&tmp), deps),
        runner,
        engine,
        link,
        capture,
        _tmp: tmp,
    }
}

fn harness() -> Harness {
    harness_with(vec![
        wireless_iface("wlan0", true, true, true),
        wireless_iface("wlan1", false, true, false),
        wired_iface("eth0"),
    ])
}

fn target() -> TargetAp {
    TargetAp {
        bssid: "AA:BB:CC:DD:EE:FF".to_string(),
        ssid: "Lab".to_string(),
        channel: 6,
        encryption: EncryptionKind::Wpa2Psk,
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        roles: vec![
            RoleRequest::pinned(Role::Ap, "wlan0"),
            RoleRequest::pinned(Role::Deauth, "wlan1"),
            RoleRequest::auto(Role::Internet),
        ],
        ..SessionOptions::default()
    }
}

#[tokio::test]
async fn full_lifecycle_reaches_done_with_lifo_cleanup() {
    let h = harness();
    let id = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap();

    let status = h.orchestrator.session_status(&id).unwrap();
    assert_eq!(status.phase, Phase::Attacking);
    assert_eq!(status.pending_cleanup, 5);
    assert_eq!(status.failed_cleanup, 0);

    // Both services were started in order: AP before DHCP/DNS.
    let spawned = h.runner.spawned();
    assert_eq!(spawned[0].0, "hostapd");
    assert_eq!(spawned[1].0, "dnsmasq");

    let status = h.orchestrator.stop_session(&id).await.unwrap();
    assert_eq!(status.phase, Phase::Done);
    assert_eq!(status.pending_cleanup, 0);
    assert_eq!(status.failed_cleanup, 0);

    // Cleanup ran exactly in reverse setup order.
    let log = h.orchestrator.cleanup_log(&id).unwrap();
    assert_eq!(
        log,
        vec![
            "stop capture server",
            "revert traffic rules",
            "stop dhcp-dns service",
            "stop access-point service",
            "flush addresses on wlan0",
        ]
    );

    // Every installed rule was removed, and the AP address flushed.
    assert_eq!(h.engine.removed().len(), h.engine.installed().len());
    assert_eq!(h.link.flushed.lock().unwrap().as_slice(), ["wlan0"]);
    assert!(!h.engine.forwarding_enabled());
}

#[tokio::test]
async fn dhcp_start_failure_unwinds_only_what_succeeded() {
    let h = harness();
    h.runner.fail_spawn_of("dnsmasq");

    let err = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ServiceStart(_)));

    // No attack action was ever taken: no rules installed, no capture
    // server launched, no deauth bursts sent.
    assert!(h.engine.installed().is_empty());
    assert_eq!(h.capture.launched(), 0);

    // The snapshot registry still knows the session; find it through the
    // persisted snapshot.
    let snapshot =
        twinjack_core::snapshot::read_snapshot(&h.orchestrator.config().snapshot_path()).unwrap();
    assert_eq!(snapshot.phase, Phase::Failed);

    let log = h.orchestrator.cleanup_log(&snapshot.id).unwrap();
    assert_eq!(
        log,
        vec!["stop access-point service", "flush addresses on wlan0"]
    );
    assert_eq!(h.link.flushed.lock().unwrap().as_slice(), ["wlan0"]);
}

#[tokio::test]
async fn capture_launch_failure_reverts_rules_and_services() {
    let h = harness();
    h.capture.fail_launch();

    let err = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Setup(_)));

    let snapshot =
        twinjack_core::snapshot::read_snapshot(&h.orchestrator.config().snapshot_path()).unwrap();
    let log = h.orchestrator.cleanup_log(&snapshot.id).unwrap();
    assert_eq!(
        log,
        vec![
            "revert traffic rules",
            "stop dhcp-dns service",
            "stop access-point service",
            "flush addresses on wlan0",
        ]
    );
    assert_eq!(h.engine.removed().len(), h.engine.installed().len());
}

#[tokio::test]
async fn allocation_failure_aborts_before_any_attack_action() {
    // Monitor-only hardware: nothing can host the AP.
    let h = harness_with(vec![wireless_iface("wlan0", false, true, true)]);

    let err = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Allocation(_)));
    assert!(err.is_configuration());

    assert!(h.runner.spawned().is_empty());
    assert!(h.engine.installed().is_empty());
    assert_eq!(h.capture.launched(), 0);

    let snapshot =
        twinjack_core::snapshot::read_snapshot(&h.orchestrator.config().snapshot_path()).unwrap();
    assert_eq!(snapshot.phase, Phase::Failed);
    assert!(h.orchestrator.cleanup_log(&snapshot.id).unwrap().is_empty());
}

#[tokio::test]
async fn stop_session_is_bounded_with_unresponsive_services() {
    let h = harness();
    let id = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap();

    h.runner.ignore_signals();

    let started = std::time::Instant::now();
    let status = h.orchestrator.stop_session(&id).await.unwrap();
    let elapsed = started.elapsed();

    assert!(status.phase.is_terminal());
    // Two unresponsive services, each bounded by grace (200ms) + force
    // (100ms), plus deauth exit and scheduling slack.
    assert!(elapsed < Duration::from_secs(3), "stop took {:?}", elapsed);
}

#[tokio::test]
async fn concurrent_stops_execute_each_cleanup_action_once() {
    let h = harness();
    let id = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap();

    let orchestrator = &h.orchestrator;
    let (a, b) = tokio::join!(orchestrator.stop_session(&id), orchestrator.stop_session(&id));
    assert!(a.unwrap().phase.is_terminal());
    assert!(b.unwrap().phase.is_terminal());

    // Five distinct actions, each exactly once.
    let log = h.orchestrator.cleanup_log(&id).unwrap();
    assert_eq!(log.len(), 5);
    let unique: std::collections::HashSet<&String> = log.iter().collect();
    assert_eq!(unique.len(), 5);
    assert_eq!(h.engine.removed().len(), h.engine.installed().len());
}

#[tokio::test]
async fn cleanup_failures_are_collected_and_reported() {
    let h = harness();
    let id = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap();

    h.engine.fail_removals();
    let status = h.orchestrator.stop_session(&id).await.unwrap();

    // Rule removals failed, but every other step still ran and the session
    // reached a terminal state.
    assert_eq!(status.phase, Phase::Failed);
    assert!(status.failed_cleanup > 0);
    let log = h.orchestrator.cleanup_log(&id).unwrap();
    assert_eq!(log.len(), 5);
    assert_eq!(h.link.flushed.lock().unwrap().as_slice(), ["wlan0"]);
}

#[tokio::test]
async fn service_death_triggers_restart_then_abort_on_repeat() {
    let h = harness();
    let id = h
        .orchestrator
        .start_session(target(), options())
        .await
        .unwrap();

    // hostapd spawned first (pid 1), dnsmasq second (pid 2). Kill the AP
    // process; the watchdog restarts it once.
    h.runner.die(twinjack_core::runner::ProcessId(1));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let hostapd_spawns = h
            .runner
            .spawned()
            .iter()
            .filter(|(name, _)| name == "hostapd")
            .count();
        if hostapd_spawns >= 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no restart observed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.orchestrator.session_status(&id).unwrap().phase, Phase::Attacking);

    // Second death inside the restart window aborts the session. The
    // restarted AP got the next pid after dnsmasq.
    let spawned = h.runner.spawned().len() as u32;
    h.runner.die(twinjack_core::runner::ProcessId(spawned));
    let status_after = h.orchestrator.wait_terminal(&id).await.unwrap();
    assert_eq!(status_after.phase, Phase::Failed);
    assert!(status_after.last_error.is_some());
}

#[tokio::test]
async fn degraded_verify_marks_captures_skipped() {
    // Two interfaces, three wireless roles: VERIFY shares hardware.
    let h = harness_with(vec![
        wireless_iface("wlan0", true, true, true),
        wireless_iface("wlan1", false, true, false),
    ]);
    let mut opts = options();
    opts.roles = vec![
        RoleRequest::auto(Role::Ap),
        RoleRequest::auto(Role::Deauth),
        RoleRequest::auto(Role::Verify),
    ];
    opts.verify = true;

    let id = h
        .orchestrator
        .start_session(target(), opts)
        .await
        .unwrap();

    // Simulate a portal submission through the launched capture log.
    let log = h.capture.log().unwrap();
    let mut fields = BTreeMap::new();
    fields.insert("username".to_string(), "alice".to_string());
    fields.insert("password".to_string(), "secret".to_string());
    let record = log
        .append("02:00:00:00:00:01".to_string(), fields)
        .await
        .unwrap();

    // The skip marker settles the record without touching the connector.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let records = h.orchestrator.captured_credentials(&id).await.unwrap();
        let status = records.iter().find(|r| r.seq == record.seq).unwrap().verification;
        if status != VerificationStatus::Pending {
            assert_eq!(status, VerificationStatus::Skipped);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never settled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = h.orchestrator.stop_session(&id).await.unwrap();
    assert!(status.phase.is_terminal());
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let h = harness();
    let bogus = twinjack_core::SessionId::generate();
    let err = h.orchestrator.session_status(&bogus).unwrap_err();
    assert!(matches!(err, SessionError::UnknownSession(_)));
}
