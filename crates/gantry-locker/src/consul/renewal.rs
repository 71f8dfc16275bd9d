use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gantry_consul_client::ConsulApi;

/// Keep a lock session alive until `cancel` fires.
///
/// Renewal errors are logged and retried on the next tick. The task ends on its
/// own when the store no longer knows the session; the lock registry is left
/// untouched in that case and `keep_lock` is the way to observe the loss.
pub(crate) fn spawn_renewal(
    api: Arc<dyn ConsulApi>,
    key: String,
    session: String,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match api.renew_session(&session).await {
                        Ok(true) => debug!("Renewed session {} for {}", session, key),
                        Ok(false) => {
                            warn!(
                                "Session {} for {} no longer exists, stopping renewal",
                                session, key
                            );
                            break;
                        }
                        Err(e) => warn!("Failed to renew session {} for {}: {}", session, key, e),
                    }
                }
            }
        }
        debug!("Renewal of session {} for {} stopped", session, key);
    })
}
