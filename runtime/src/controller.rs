//! The reconciliation controller.
//!
//! Public face of the engine: product loading, the purchase protocol,
//! restore, and the entitlement queries the rest of the application gates
//! on. One explicitly-constructed instance per process, dependency-injected;
//! tests build isolated controllers around fakes.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use entitlements_core::{
    CatalogError, Clock, EntitlementEvent, FlagStore, PlanTier, ProductDescriptor, ProductId,
    PurchaseError, PurchaseReply, RestoreError, StorefrontService, TransactionRecord, verify,
};

use crate::backoff::ReconnectPolicy;
use crate::catalog::ProductCatalog;
use crate::environment::EntitlementEnvironment;
use crate::listener::{self, ListenerHandle};
use crate::store::{EntitlementStore, persist_snapshot};

/// Tunables for the controller and the listener it spawns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on catalog refresh round-trips.
    pub catalog_timeout: Duration,

    /// Bound on the restore snapshot fetch (and the preceding sync request).
    pub restore_timeout: Duration,

    /// Bound on a purchase round-trip. Generous by default: the storefront
    /// may be waiting on the user in a payment sheet.
    pub purchase_timeout: Duration,

    /// Listener resubscription backoff.
    pub reconnect: ReconnectPolicy,
}

impl EngineConfig {
    /// Create a config with default settings.
    ///
    /// Defaults: catalog 10s, restore 15s, purchase 5 minutes, default
    /// reconnect backoff.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            catalog_timeout: Duration::from_secs(10),
            restore_timeout: Duration::from_secs(15),
            purchase_timeout: Duration::from_secs(300),
            reconnect: ReconnectPolicy::new(),
        }
    }

    /// Set the catalog refresh bound.
    #[must_use]
    pub const fn with_catalog_timeout(mut self, bound: Duration) -> Self {
        self.catalog_timeout = bound;
        self
    }

    /// Set the restore bound.
    #[must_use]
    pub const fn with_restore_timeout(mut self, bound: Duration) -> Self {
        self.restore_timeout = bound;
        self
    }

    /// Set the purchase bound.
    #[must_use]
    pub const fn with_purchase_timeout(mut self, bound: Duration) -> Self {
        self.purchase_timeout = bound;
        self
    }

    /// Set the listener resubscription backoff.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal result of one purchase call.
///
/// `Pending` is neither an error nor an entitlement yet: it resolves later
/// through the transaction feed. Callers treat the change feed or
/// [`EntitlementController::is_entitled`] polling as the completion signal,
/// not a second return from `purchase`.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// Verified and applied; the product is entitled now.
    Completed(TransactionRecord),

    /// The user backed out of the payment flow; nothing changed.
    UserCancelled,

    /// Awaiting out-of-band approval; nothing changed yet.
    Pending,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementSnapshot {
    /// The authoritative entitled set after the replace.
    pub entitled: BTreeSet<ProductId>,

    /// Snapshot records dropped by verification.
    pub discarded: usize,
}

/// The reconciliation controller.
///
/// Thin over the store and catalog for reads; owns the purchase and restore
/// protocols. Concurrent calls for different products are safe; all
/// entitlement mutations serialize inside [`EntitlementStore`].
#[derive(Clone)]
pub struct EntitlementController<S, F, C>
where
    S: StorefrontService + Clone,
    F: FlagStore + Clone,
    C: Clock + Clone,
{
    environment: EntitlementEnvironment<S, F, C>,
    store: EntitlementStore,
    catalog: ProductCatalog,
    config: EngineConfig,
}

impl<S, F, C> EntitlementController<S, F, C>
where
    S: StorefrontService + Clone + Send + Sync + 'static,
    F: FlagStore + Clone + Send + Sync + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Assemble a controller over existing parts.
    ///
    /// Most callers want [`start`](Self::start); this constructor exists for
    /// tests and for processes that manage the listener themselves.
    #[must_use]
    pub const fn new(
        environment: EntitlementEnvironment<S, F, C>,
        store: EntitlementStore,
        catalog: ProductCatalog,
        config: EngineConfig,
    ) -> Self {
        Self {
            environment,
            store,
            catalog,
            config,
        }
    }

    /// Composition-root constructor: build the store, seed it from the
    /// persisted snapshot, and spawn the supervised listener.
    ///
    /// The returned handle owns the listener task; keep it alive for the
    /// process lifetime and call [`ListenerHandle::shutdown`] on exit.
    pub async fn start(
        environment: EntitlementEnvironment<S, F, C>,
        config: EngineConfig,
    ) -> (Self, ListenerHandle) {
        let store = EntitlementStore::new();
        match environment.flags.load().await {
            Ok(Some(cached)) => {
                let count = cached.len();
                store.seed(cached, environment.clock.now());
                tracing::info!(count, "seeded entitlements from persisted snapshot");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to load persisted entitlement snapshot");
            }
        }

        let handle = listener::spawn(environment.clone(), store.clone(), config.reconnect.clone());
        let controller = Self::new(environment, store, ProductCatalog::new(), config);
        (controller, handle)
    }

    /// Refresh the catalog for exactly `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`]; on any error the previously cached catalog
    /// remains available through [`products`](Self::products).
    pub async fn load_products(
        &self,
        ids: &[ProductId],
    ) -> Result<Vec<ProductDescriptor>, CatalogError> {
        self.catalog
            .refresh(&self.environment.storefront, ids, self.config.catalog_timeout)
            .await
    }

    /// The cached catalog, in storefront order.
    #[must_use]
    pub fn products(&self) -> Vec<ProductDescriptor> {
        self.catalog.current()
    }

    /// Default product to offer, per storefront ordering.
    #[must_use]
    pub fn default_product(&self) -> Option<ProductDescriptor> {
        self.catalog.default_selection()
    }

    /// Run the purchase protocol for one product.
    ///
    /// A storefront-reported success is re-verified before anything is
    /// applied: an unverifiable "success" surfaces as
    /// [`PurchaseError::VerificationFailed`] and grants nothing.
    /// `UserCancelled` and `Pending` replies return without touching
    /// entitlement state.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError`]; cancellation and pending approval are
    /// outcomes, not errors, so callers can offer "try again" only on real
    /// failures.
    pub async fn purchase(
        &self,
        product: &ProductDescriptor,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let bound = self.config.purchase_timeout;
        let reply = timeout(bound, self.environment.storefront.begin_purchase(&product.id))
            .await
            .map_err(|_| PurchaseError::Timeout { elapsed: bound })?;
        let reply = reply?;

        match reply {
            PurchaseReply::Success(envelope) => {
                let record = verify(&envelope, self.environment.clock.now()).map_err(|err| {
                    tracing::warn!(
                        product_id = %product.id,
                        error = %err,
                        "storefront reported success but the envelope failed verification"
                    );
                    metrics::counter!("entitlements.purchase.verification_failed").increment(1);
                    PurchaseError::VerificationFailed(err)
                })?;

                if record.product_id != product.id {
                    tracing::warn!(
                        requested = %product.id,
                        granted = %record.product_id,
                        "purchase granted a different product than requested"
                    );
                }

                self.store.apply(&record);
                persist_snapshot(&self.environment.flags, &self.store).await;
                if let Err(err) = self.environment.storefront.finish(record.transaction_id).await
                {
                    tracing::warn!(
                        transaction_id = %record.transaction_id,
                        error = %err,
                        "acknowledge failed, storefront will redeliver"
                    );
                }
                metrics::counter!("entitlements.purchase.completed").increment(1);
                tracing::info!(
                    product_id = %record.product_id,
                    transaction_id = %record.transaction_id,
                    "purchase completed"
                );
                Ok(PurchaseOutcome::Completed(record))
            }
            PurchaseReply::UserCancelled => {
                tracing::info!(product_id = %product.id, "purchase cancelled by user");
                Ok(PurchaseOutcome::UserCancelled)
            }
            PurchaseReply::Pending => {
                tracing::info!(
                    product_id = %product.id,
                    "purchase pending approval, completion arrives on the transaction feed"
                );
                Ok(PurchaseOutcome::Pending)
            }
        }
    }

    /// Reconcile against the storefront's authoritative entitlement snapshot.
    ///
    /// Asks the storefront to sync (best-effort), fetches the snapshot within
    /// the configured bound, verifies each record (discarding and logging
    /// the unverifiable), and replaces the local set wholesale. This is the
    /// only path that removes entitlements; expiry, refunds, and revocations
    /// all surface as absence from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::Timeout`] when the snapshot fetch exceeds the
    /// bound, or [`RestoreError::Transport`] on storefront failure. The local
    /// set is untouched on error.
    pub async fn restore(&self) -> Result<EntitlementSnapshot, RestoreError> {
        let bound = self.config.restore_timeout;

        match timeout(bound, self.environment.storefront.sync()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "storefront sync failed before restore");
            }
            Err(_) => tracing::warn!("storefront sync timed out before restore"),
        }

        let envelopes = timeout(bound, self.environment.storefront.current_entitlements())
            .await
            .map_err(|_| RestoreError::Timeout { elapsed: bound })?;
        let envelopes = envelopes?;

        let now = self.environment.clock.now();
        let mut verified = Vec::with_capacity(envelopes.len());
        let mut discarded = 0usize;
        for envelope in &envelopes {
            match verify(envelope, now) {
                Ok(record) => verified.push(record),
                Err(err) => {
                    discarded += 1;
                    tracing::warn!(
                        product_id = ?err.product_id(),
                        error = %err,
                        "discarding unverifiable snapshot record"
                    );
                }
            }
        }

        let delta = self.store.replace_all(&verified);
        persist_snapshot(&self.environment.flags, &self.store).await;
        metrics::counter!("entitlements.restore.completed").increment(1);
        tracing::info!(
            granted = delta.granted.len(),
            revoked = delta.revoked.len(),
            discarded,
            "entitlements reconciled against storefront snapshot"
        );

        Ok(EntitlementSnapshot {
            entitled: self.store.snapshot(),
            discarded,
        })
    }

    /// Whether the product is currently entitled.
    ///
    /// Synchronous and allocation-free; safe to poll before every ad-display
    /// decision and premium gate.
    #[must_use]
    pub fn is_entitled(&self, product_id: &ProductId) -> bool {
        self.store.is_entitled(product_id)
    }

    /// Whether any product is entitled (the ad-suppression bool).
    #[must_use]
    pub fn any_entitled(&self) -> bool {
        self.store.any_entitled()
    }

    /// Ordered view of entitled identifiers, for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<ProductId> {
        self.store.snapshot()
    }

    /// Billing-period classification for display.
    ///
    /// Pure identifier substring matching; never consulted for entitlement
    /// decisions.
    #[allow(clippy::unused_self)]
    #[must_use]
    pub fn classify(&self, product: &ProductDescriptor) -> PlanTier {
        PlanTier::from_identifier(&product.id)
    }

    /// Subscribe to entitlement membership changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.store.subscribe()
    }
}
