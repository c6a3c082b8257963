use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wadmin_types::api::GatewayStatus;
use wadmin_upstream::GatewayApi;

use crate::state::AppState;

/// Last known gateway reachability, read by the dashboard.
pub struct Reachability {
    last: RwLock<(GatewayStatus, Option<DateTime<Utc>>)>,
}

impl Default for Reachability {
    fn default() -> Self {
        Self {
            last: RwLock::new((GatewayStatus::Offline, None)),
        }
    }
}

impl Reachability {
    /// Status plus the time it was observed; `None` until the first check.
    pub async fn snapshot(&self) -> (GatewayStatus, Option<DateTime<Utc>>) {
        *self.last.read().await
    }

    /// Check the gateway once and store the result. Returns the previous
    /// status alongside the new one.
    pub async fn check_once(&self, gateway: &dyn GatewayApi) -> (GatewayStatus, GatewayStatus) {
        let status = if gateway.check_status().await {
            GatewayStatus::Online
        } else {
            GatewayStatus::Offline
        };

        let mut last = self.last.write().await;
        let previous = last.0;
        *last = (status, Some(Utc::now()));
        (previous, status)
    }
}

/// Poll the gateway every `interval` until `cancel` fires. The first check
/// runs immediately.
pub fn spawn_monitor(
    state: AppState,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reachability monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    // A stalled check must not hold up shutdown.
                    let checked = cancel
                        .run_until_cancelled(state.reachability.check_once(state.gateway.as_ref()))
                        .await;
                    match checked {
                        None => {
                            info!("Reachability monitor stopped mid-check");
                            break;
                        }
                        Some((GatewayStatus::Offline, GatewayStatus::Online)) => info!("Gateway is online"),
                        Some((GatewayStatus::Online, GatewayStatus::Offline)) => warn!("Gateway went offline"),
                        Some(_) => {}
                    }
                }
            }
        }
    })
}
