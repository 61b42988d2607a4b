//! Continuous deauthentication loop.
//!
//! Sends one burst per interval until cancelled. Targeting: a non-empty
//! client list restricts bursts to those clients, otherwise the burst is
//! broadcast to everyone on the target BSSID. Transient send failures are
//! logged and the loop keeps going; a run of consecutive failures promotes
//! the loop to failed and surfaces the condition to the coordinator.
//! Cancellation is observed within one interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServiceHealthError;
use crate::runner::DeauthSender;
use crate::types::TargetAp;

#[derive(Debug, Clone)]
pub struct DeauthConfig {
    pub interval: Duration,
    /// Empty means broadcast.
    pub clients: Vec<String>,
    pub failure_threshold: u32,
}

/// Run the loop until cancellation (Ok) or the failure threshold (Err).
pub async fn run_deauth_loop(
    sender: Arc<dyn DeauthSender>,
    interface: String,
    target: TargetAp,
    config: DeauthConfig,
    cancel: CancellationToken,
) -> Result<(), ServiceHealthError> {
    let mode = if config.clients.is_empty() {
        "broadcast".to_string()
    } else {
        format!("{} targeted clients", config.clients.len())
    };
    info!(
        interface = %interface,
        bssid = %target.bssid,
        interval_ms = config.interval.as_millis() as u64,
        %mode,
        "deauth loop started"
    );

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(interface = %interface, "deauth loop cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {
                let sender = Arc::clone(&sender);
                let iface = interface.clone();
                let target = target.clone();
                let clients = config.clients.clone();
                let result = tokio::task::spawn_blocking(move || {
                    sender.send_burst(&iface, &target, &clients)
                })
                .await;

                match result {
                    Ok(Ok(())) => {
                        if consecutive_failures > 0 {
                            debug!(interface = %interface, "deauth send recovered");
                        }
                        consecutive_failures = 0;
                    }
                    Ok(Err(err)) => {
                        consecutive_failures += 1;
                        warn!(
                            interface = %interface,
                            failures = consecutive_failures,
                            error = %err,
                            "deauth burst failed"
                        );
                    }
                    Err(join_err) => {
                        consecutive_failures += 1;
                        warn!(
                            interface = %interface,
                            failures = consecutive_failures,
                            error = %join_err,
                            "deauth send task panicked"
                        );
                    }
                }

                if consecutive_failures >= config.failure_threshold {
                    return Err(ServiceHealthError::DeauthFailed {
                        failures: consecutive_failures,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDeauthSender;
    use crate::types::EncryptionKind;
    use std::time::Instant;

    fn target() -> TargetAp {
        TargetAp {
            bssid: "AA:BB:CC:DD:EE:FF".to_string(),
            ssid: "Lab".to_string(),
            channel: 6,
            encryption: EncryptionKind::Wpa2Psk,
        }
    }

    #[tokio::test]
    async fn cancellation_observed_within_one_interval() {
        let sender = Arc::new(FakeDeauthSender::default());
        let cancel = CancellationToken::new();
        let config = DeauthConfig {
            interval: Duration::from_millis(200),
            clients: Vec::new(),
            failure_threshold: 5,
        };

        let task = tokio::spawn(run_deauth_loop(
            sender.clone(),
            "wlan1".to_string(),
            target(),
            config,
            cancel.clone(),
        ));

        // Let at least one burst go out, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        let result = task.await.unwrap();
        let latency = cancelled_at.elapsed();

        assert!(result.is_ok());
        assert!(latency <= Duration::from_millis(200), "exit latency {:?}", latency);
        assert!(sender.bursts() >= 1);
    }

    #[tokio::test]
    async fn consecutive_failures_surface_to_coordinator() {
        let sender = Arc::new(FakeDeauthSender::default());
        sender.fail_all();
        let cancel = CancellationToken::new();
        let config = DeauthConfig {
            interval: Duration::from_millis(10),
            clients: Vec::new(),
            failure_threshold: 5,
        };

        let result = run_deauth_loop(
            sender.clone(),
            "wlan1".to_string(),
            target(),
            config,
            cancel,
        )
        .await;

        assert!(matches!(
            result,
            Err(ServiceHealthError::DeauthFailed { failures: 5 })
        ));
    }

    #[tokio::test]
    async fn transient_failures_do_not_stop_the_loop() {
        let sender = Arc::new(FakeDeauthSender::default());
        sender.fail_next(3); // below the threshold of 5
        let cancel = CancellationToken::new();
        let config = DeauthConfig {
            interval: Duration::from_millis(10),
            clients: vec!["11:22:33:44:55:66".to_string()],
            failure_threshold: 5,
        };

        let task = tokio::spawn(run_deauth_loop(
            sender.clone(),
            "wlan1".to_string(),
            target(),
            config,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        // The loop recovered and kept sending after the induced failures.
        assert!(sender.bursts() > 3);
    }
}
