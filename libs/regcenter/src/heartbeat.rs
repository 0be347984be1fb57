//! Per-instance liveness renewal task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backend::{CheckStatus, CoordinationBackend};
use crate::throttled_log::ThrottledLog;

/// Handle to a running heartbeat task.
///
/// The task renews `check_id` every `interval` until its token is cancelled.
/// Renewal failures are logged and never end the task; the backend TTL is
/// what eventually marks a silent instance unhealthy.
pub struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HeartbeatSpec {
    pub service_id: String,
    pub check_id: String,
    pub interval: Duration,
}

impl Heartbeat {
    /// Spawn the renewal loop. `cancel` is normally a child of the registry's
    /// root token so that closing the registry stops every heartbeat.
    pub fn spawn(
        backend: Arc<dyn CoordinationBackend>,
        spec: HeartbeatSpec,
        cancel: CancellationToken,
        failures: Arc<ThrottledLog>,
        span: &tracing::Span,
    ) -> Self {
        let span = tracing::debug_span!(parent: span, "heartbeat", service_id = %spec.service_id);
        let task = tokio::spawn(
            run(backend, spec, cancel.clone(), failures).instrument(span),
        );
        Self { cancel, task }
    }

    /// Cancel the task and wait until it has exited.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "Heartbeat task panicked");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn run(
    backend: Arc<dyn CoordinationBackend>,
    spec: HeartbeatSpec,
    cancel: CancellationToken,
    failures: Arc<ThrottledLog>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + spec.interval, spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(interval = ?spec.interval, "Heartbeat started");

    let mut consecutive_failures: u64 = 0;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let renewal = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = backend.renew_liveness(&spec.check_id, CheckStatus::Passing) => result,
        };

        match renewal {
            Ok(()) => {
                if consecutive_failures > 0 {
                    tracing::info!(
                        after_failures = consecutive_failures,
                        "Heartbeat recovered"
                    );
                }
                consecutive_failures = 0;
                tracing::trace!("Liveness renewed");
            }
            Err(e) => {
                consecutive_failures += 1;
                if let Some(suppressed) = failures.admit() {
                    tracing::warn!(
                        check_id = %spec.check_id,
                        error = %e,
                        consecutive_failures,
                        suppressed,
                        "Heartbeat renewal failed"
                    );
                } else {
                    tracing::debug!(error = %e, "Heartbeat renewal failed");
                }
            }
        }
    }

    tracing::debug!("Heartbeat stopped");
}
