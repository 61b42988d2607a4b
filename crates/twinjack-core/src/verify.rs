//! Best-effort verification of captured credentials.
//!
//! Each new capture event triggers at most one association attempt against
//! the real target, exclusively on the designated verify interface.
//! Attempts are serialized through a single-slot queue: one in flight, and
//! an event arriving while the slot is taken resolves `Inconclusive`
//! instead of piling up. Verification never blocks or aborts the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::VerificationError;
use crate::runner::{ConnectOutcome, WifiConnector};
use crate::store::CredentialLog;
use crate::types::{CapturedCredential, TargetAp, VerificationStatus};

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub interface: String,
    pub attempt_timeout: Duration,
}

/// Spawn the verifier: a feeder translating capture events into the
/// single-slot queue, and a worker performing one attempt at a time.
/// Returns the worker handle; both tasks exit on cancellation.
pub fn spawn_verifier(
    connector: Arc<dyn WifiConnector>,
    config: VerifierConfig,
    target: TargetAp,
    log: Arc<CredentialLog>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let (slot_tx, slot_rx) = mpsc::channel::<CapturedCredential>(1);

    let feeder_log = Arc::clone(&log);
    let feeder_cancel = cancel.clone();
    let mut events = log.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = feeder_cancel.cancelled() => break,
                event = events.recv() => {
                    let record = match event {
                        Ok(record) => record,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "verifier lagged behind capture events");
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    };
                    if record.verification != VerificationStatus::Pending {
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(rejected)) =
                        slot_tx.try_send(record)
                    {
                        debug!(
                            seq = rejected.seq,
                            reason = %VerificationError::Busy,
                            "marking inconclusive"
                        );
                        if let Err(err) = feeder_log
                            .set_verification(rejected.seq, VerificationStatus::Inconclusive)
                            .await
                        {
                            warn!(error = %err, "failed to record inconclusive verdict");
                        }
                    }
                }
            }
        }
    });

    tokio::spawn(run_worker(connector, config, target, log, cancel, slot_rx))
}

async fn run_worker(
    connector: Arc<dyn WifiConnector>,
    config: VerifierConfig,
    target: TargetAp,
    log: Arc<CredentialLog>,
    cancel: CancellationToken,
    mut slot_rx: mpsc::Receiver<CapturedCredential>,
) {
    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break,
            record = slot_rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        let status = verify_one(Arc::clone(&connector), &config, &target, &record).await;
        info!(seq = record.seq, status = ?status, "verification finished");
        if let Err(err) = log.set_verification(record.seq, status).await {
            warn!(seq = record.seq, error = %err, "failed to record verification verdict");
        }
    }
}

async fn verify_one(
    connector: Arc<dyn WifiConnector>,
    config: &VerifierConfig,
    target: &TargetAp,
    record: &CapturedCredential,
) -> VerificationStatus {
    let Some(psk) = record.password().map(|s| s.to_string()) else {
        debug!(seq = record.seq, "no password field; skipping verification");
        return VerificationStatus::Skipped;
    };

    let iface = config.interface.clone();
    let ssid = target.ssid.clone();
    let bssid = target.bssid.clone();
    let timeout = config.attempt_timeout;

    // The connector call may block for the whole attempt timeout.
    let handle = tokio::task::spawn_blocking(move || {
        connector.try_connect(&iface, &ssid, &psk, Some(&bssid), timeout)
    });
    let outcome = match handle.await {
        Ok(result) => result,
        Err(join_err) => {
            warn!(seq = record.seq, error = %join_err, "verification task panicked");
            return VerificationStatus::Inconclusive;
        }
    };

    match outcome {
        Ok(ConnectOutcome::Connected) => VerificationStatus::Verified,
        Ok(ConnectOutcome::AuthFailed) => VerificationStatus::Rejected,
        Ok(ConnectOutcome::Timeout) | Ok(ConnectOutcome::Unreachable) => {
            VerificationStatus::Inconclusive
        }
        Err(err) => {
            let err = VerificationError::Connector(err.to_string());
            warn!(seq = record.seq, error = %err, "verification attempt errored");
            VerificationStatus::Inconclusive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use crate::types::EncryptionKind;
    use std::collections::BTreeMap;

    fn target() -> TargetAp {
        TargetAp {
            bssid: "AA:BB:CC:DD:EE:FF".to_string(),
            ssid: "Lab".to_string(),
            channel: 6,
            encryption: EncryptionKind::Wpa2Psk,
        }
    }

    fn creds(pass: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), "alice".to_string());
        fields.insert("password".to_string(), pass.to_string());
        fields
    }

    async fn wait_for_status(
        log: &CredentialLog,
        seq: u64,
        timeout: Duration,
    ) -> VerificationStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = log.records().await;
            let status = records
                .iter()
                .find(|r| r.seq == seq)
                .map(|r| r.verification)
                .unwrap();
            if status != VerificationStatus::Pending {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "verification never settled"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn outcomes_map_to_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CredentialLog::open(dir.path()).await.unwrap());
        let connector = Arc::new(FakeConnector::default());
        connector.respond_with(ConnectOutcome::Connected);
        let cancel = CancellationToken::new();

        let _worker = spawn_verifier(
            connector.clone(),
            VerifierConfig {
                interface: "wlan2".to_string(),
                attempt_timeout: Duration::from_millis(100),
            },
            target(),
            Arc::clone(&log),
            cancel.clone(),
        );

        let record = log
            .append("02:00:00:00:00:01".to_string(), creds("right-password"))
            .await
            .unwrap();
        let status = wait_for_status(&log, record.seq, Duration::from_secs(2)).await;
        assert_eq!(status, VerificationStatus::Verified);

        connector.respond_with(ConnectOutcome::AuthFailed);
        let record = log
            .append("02:00:00:00:00:02".to_string(), creds("wrong-password"))
            .await
            .unwrap();
        let status = wait_for_status(&log, record.seq, Duration::from_secs(2)).await;
        assert_eq!(status, VerificationStatus::Rejected);

        cancel.cancel();
    }

    #[tokio::test]
    async fn missing_password_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CredentialLog::open(dir.path()).await.unwrap());
        let connector = Arc::new(FakeConnector::default());
        let cancel = CancellationToken::new();

        let _worker = spawn_verifier(
            connector.clone(),
            VerifierConfig {
                interface: "wlan2".to_string(),
                attempt_timeout: Duration::from_millis(100),
            },
            target(),
            Arc::clone(&log),
            cancel.clone(),
        );

        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), "alice".to_string());
        let record = log
            .append("02:00:00:00:00:03".to_string(), fields)
            .await
            .unwrap();
        let status = wait_for_status(&log, record.seq, Duration::from_secs(2)).await;
        assert_eq!(status, VerificationStatus::Skipped);
        assert_eq!(connector.attempts(), 0);

        cancel.cancel();
    }

    #[tokio::test]
    async fn busy_slot_resolves_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CredentialLog::open(dir.path()).await.unwrap());
        let connector = Arc::new(FakeConnector::default());
        connector.respond_with(ConnectOutcome::Connected);
        connector.delay(Duration::from_millis(400));
        let cancel = CancellationToken::new();

        let _worker = spawn_verifier(
            connector.clone(),
            VerifierConfig {
                interface: "wlan2".to_string(),
                attempt_timeout: Duration::from_millis(500),
            },
            target(),
            Arc::clone(&log),
            cancel.clone(),
        );

        // First record occupies the worker; the next two land while the
        // slot is busy: one queues, one is shed as inconclusive.
        let first = log
            .append("02:00:00:00:00:01".to_string(), creds("a"))
            .await
            .unwrap();
        // Wait until the worker has dequeued the first attempt so the slot
        // is observably free, then refill it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while connector.attempts() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "worker never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = log
            .append("02:00:00:00:00:02".to_string(), creds("b"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let third = log
            .append("02:00:00:00:00:03".to_string(), creds("c"))
            .await
            .unwrap();

        let first_status = wait_for_status(&log, first.seq, Duration::from_secs(3)).await;
        assert_eq!(first_status, VerificationStatus::Verified);
        let third_status = wait_for_status(&log, third.seq, Duration::from_secs(3)).await;
        assert_eq!(third_status, VerificationStatus::Inconclusive);
        let second_status = wait_for_status(&log, second.seq, Duration::from_secs(3)).await;
        assert_eq!(second_status, VerificationStatus::Verified);

        cancel.cancel();
    }
}
