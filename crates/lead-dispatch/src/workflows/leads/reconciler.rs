//! Background sweep that hands abandoned dispatch claims back to `sent`.
//!
//! A claim is abandoned when the task holding it died before recording an outcome. The claim TTL
//! is longer than the notification timeout, so live attempts are never reclaimed.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::dispatch::DispatchNotifier;

/// Runs [`DispatchNotifier::reconcile_stale_claims`] every `interval` until `cancel` fires.
pub async fn run_claim_reconciler(
    notifier: DispatchNotifier,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        claim_ttl_secs = notifier.config().claim_ttl.as_secs(),
        "claim reconciler started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("claim reconciler stopping");
                break;
            }
            _ = ticker.tick() => {
                match notifier.reconcile_stale_claims(Utc::now()) {
                    Ok(0) => tracing::debug!("no stale claims"),
                    Ok(reclaimed) => tracing::info!(reclaimed, "stale claims returned to sent"),
                    Err(err) => tracing::error!(error = %err, "claim reconciliation failed"),
                }
            }
        }
    }
}
