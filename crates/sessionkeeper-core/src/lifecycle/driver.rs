//! The session driver task: the only place timers live.
//!
//! One loop selects over teardown, facade commands, the watchdog's expiry
//! deadline, completions of in-flight renewals and the renewal ticker. At
//! most one expiry sleep exists at a time because it is rebuilt from the
//! watchdog's current deadline on every iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RenewalBackend};
use crate::auth::Credential;

use super::facade::{DriverCommand, Shared};
use super::renewer::RenewalRequest;

type RenewalResult = (RenewalRequest, Result<Credential, ApiError>);

/// Translate the watchdog's wall-clock deadline onto the tokio clock
fn expiry_instant(shared: &Shared) -> Option<Instant> {
    let deadline = shared.expiry_deadline()?;
    let remaining = (deadline - shared.now()).to_std().unwrap_or(Duration::ZERO);
    Some(Instant::now() + remaining)
}

fn start_renewal(
    shared: &Shared,
    backend: &Arc<dyn RenewalBackend>,
    inflight: &mut JoinSet<RenewalResult>,
) {
    if let Some(request) = shared.tick() {
        let backend = Arc::clone(backend);
        inflight.spawn(async move {
            let result = backend
                .refresh_token(&request.subject_id, &request.credential)
                .await;
            (request, result)
        });
    }
}

pub(super) async fn run(
    shared: Arc<Shared>,
    backend: Arc<dyn RenewalBackend>,
    mut commands: mpsc::Receiver<DriverCommand>,
    cancel: CancellationToken,
    tick_interval: Duration,
) {
    // First check one full interval after start, like a browser setInterval
    let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut inflight: JoinSet<RenewalResult> = JoinSet::new();

    debug!(?tick_interval, "Session driver started");

    loop {
        let deadline = expiry_instant(&shared);
        let expiry = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            command = commands.recv() => match command {
                // Deadline is re-read at the top of the loop
                Some(DriverCommand::Rearm) => {}
                Some(DriverCommand::Tick) => start_renewal(&shared, &backend, &mut inflight),
                None => break,
            },

            _ = expiry => shared.fire_expiry(),

            Some(joined) = inflight.join_next() => match joined {
                Ok((request, result)) => shared.complete_renewal(request, result),
                Err(e) => {
                    warn!(error = %e, "Renewal task failed");
                    shared.abandon_renewal();
                }
            },

            _ = ticker.tick() => start_renewal(&shared, &backend, &mut inflight),
        }
    }

    // Let an in-flight renewal finish on its own; nobody applies its result
    inflight.detach_all();
    info!("Session driver stopped");
}
