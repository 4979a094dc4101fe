//! The transaction listener.
//!
//! One long-lived task drains the storefront's transaction feed for the
//! process lifetime: verify, apply, acknowledge, repeat. The loop is
//! supervised: a dropped feed or failed subscription triggers resubscription
//! with jittered exponential backoff, and a bad record is logged and
//! skipped. Nothing that arrives on the feed can stop it; only shutdown can.

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use entitlements_core::{
    Clock, FlagStore, StorefrontService, TransactionEnvelope, TransactionStream, verify,
};

use crate::backoff::ReconnectPolicy;
use crate::environment::EntitlementEnvironment;
use crate::store::{EntitlementStore, persist_snapshot};

/// Handle to the spawned listener task.
///
/// Dropping the handle stops the loop at the next envelope boundary; use
/// [`shutdown`](Self::shutdown) to stop it and wait for the task to exit.
pub struct ListenerHandle {
    join: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl ListenerHandle {
    /// Signal shutdown and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.join.await;
    }

    /// `true` once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the supervised listener.
///
/// Cancellation lands only between envelopes, so the apply-then-acknowledge
/// ordering for an individual record is never torn: at worst an applied
/// record goes unacknowledged, the storefront redelivers it on the next
/// connect, and the idempotent re-apply absorbs the duplicate.
pub fn spawn<S, F, C>(
    environment: EntitlementEnvironment<S, F, C>,
    store: EntitlementStore,
    policy: ReconnectPolicy,
) -> ListenerHandle
where
    S: StorefrontService + Clone + Send + Sync + 'static,
    F: FlagStore + Clone + Send + Sync + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    let (stop, stopped) = watch::channel(false);
    let join = tokio::spawn(run(environment, store, policy, stopped));
    ListenerHandle { join, stop }
}

async fn run<S, F, C>(
    environment: EntitlementEnvironment<S, F, C>,
    store: EntitlementStore,
    policy: ReconnectPolicy,
    mut stopped: watch::Receiver<bool>,
) where
    S: StorefrontService + Clone + Send + Sync + 'static,
    F: FlagStore + Clone + Send + Sync + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    let mut attempt: u32 = 0;
    loop {
        if *stopped.borrow() {
            break;
        }

        match environment.storefront.transaction_updates().await {
            Ok(stream) => {
                tracing::info!("transaction feed connected");
                metrics::counter!("entitlements.listener.connects").increment(1);
                attempt = 0;
                match drain(&environment, &store, stream, &mut stopped).await {
                    Drained::Stopped => break,
                    Drained::Disconnected => {
                        tracing::warn!("transaction feed ended, resubscribing");
                    }
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "transaction feed subscription failed");
            }
        }

        metrics::counter!("entitlements.listener.reconnects").increment(1);
        let delay = policy.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tracing::debug!(attempt, ?delay, "backing off before resubscribe");
        tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
    tracing::info!("transaction listener stopped");
}

enum Drained {
    /// Shutdown was requested.
    Stopped,
    /// The feed ended; the supervisor should resubscribe.
    Disconnected,
}

async fn drain<S, F, C>(
    environment: &EntitlementEnvironment<S, F, C>,
    store: &EntitlementStore,
    mut stream: TransactionStream,
    stopped: &mut watch::Receiver<bool>,
) -> Drained
where
    S: StorefrontService + Clone,
    F: FlagStore + Clone,
    C: Clock + Clone,
{
    loop {
        tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    return Drained::Stopped;
                }
            }
            item = stream.next() => match item {
                Some(Ok(envelope)) => handle_envelope(environment, store, &envelope).await,
                Some(Err(err)) => {
                    // One undecodable delivery must not starve the feed.
                    tracing::warn!(error = %err, "skipping undecodable feed item");
                    metrics::counter!("entitlements.listener.stream_errors").increment(1);
                }
                None => return Drained::Disconnected,
            }
        }
    }
}

async fn handle_envelope<S, F, C>(
    environment: &EntitlementEnvironment<S, F, C>,
    store: &EntitlementStore,
    envelope: &TransactionEnvelope,
) where
    S: StorefrontService + Clone,
    F: FlagStore + Clone,
    C: Clock + Clone,
{
    match verify(envelope, environment.clock.now()) {
        Ok(record) => {
            let newly_granted = store.apply(&record);
            if newly_granted {
                persist_snapshot(&environment.flags, store).await;
            }
            // Acknowledge only after the grant is applied; a stop between the
            // two is absorbed by redelivery plus idempotent re-apply.
            if let Err(err) = environment.storefront.finish(record.transaction_id).await {
                tracing::warn!(
                    transaction_id = %record.transaction_id,
                    product_id = %record.product_id,
                    error = %err,
                    "acknowledge failed, storefront will redeliver"
                );
            }
            metrics::counter!("entitlements.listener.applied").increment(1);
        }
        Err(err) => {
            tracing::warn!(
                product_id = ?err.product_id(),
                error = %err,
                "dropping unverifiable transaction"
            );
            metrics::counter!("entitlements.listener.rejected").increment(1);
        }
    }
}
