//! The entitlement store.
//!
//! Process-wide, single-writer set of currently-entitled products. Mutated by
//! exactly two call sites (the transaction listener's apply path and the
//! controller's purchase/restore path) and read by arbitrarily many callers.
//! All mutations serialize on one write lock; reads never block writes out of
//! order. Membership changes are broadcast so consumers can react without
//! polling.

use std::collections::{BTreeSet, HashMap};
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use entitlements_core::{
    EntitlementEvent, FlagStore, ProductId, TransactionId, TransactionRecord,
};

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("entitlement lock poisoned on read, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("entitlement lock poisoned on write, recovering");
        PoisonError::into_inner(poisoned)
    })
}

/// Diagnostic view of one active entitlement.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    /// Entitled product.
    pub product_id: ProductId,

    /// Transaction that most recently granted it; `None` for entries seeded
    /// from the persisted snapshot before the first storefront contact.
    pub transaction_id: Option<TransactionId>,

    /// When the engine last saw evidence for this entitlement.
    pub last_seen: DateTime<Utc>,
}

/// Membership changes produced by one reconciliation replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDelta {
    /// Products newly entitled by the snapshot.
    pub granted: Vec<ProductId>,

    /// Products the snapshot no longer contains.
    pub revoked: Vec<ProductId>,
}

impl ReconcileDelta {
    /// `true` when the snapshot changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.revoked.is_empty()
    }
}

/// Cloneable handle to the shared entitlement set.
///
/// Between two reconciliations, [`apply`](Self::apply) only grows the set:
/// the push stream carries no revoke event, so absence of fresh renewals must
/// not drop an entitlement the listener simply has not re-seen yet. The next
/// [`replace_all`](Self::replace_all) is what authoritatively prunes.
#[derive(Clone)]
pub struct EntitlementStore {
    entitled: Arc<RwLock<HashMap<ProductId, Entitlement>>>,
    changes: broadcast::Sender<EntitlementEvent>,
}

impl EntitlementStore {
    /// Create an empty store with the default change-feed capacity (16).
    #[must_use]
    pub fn new() -> Self {
        Self::with_broadcast_capacity(16)
    }

    /// Create an empty store with a custom change-feed capacity.
    ///
    /// Increase it when slow subscribers would otherwise lag behind bursts of
    /// reconciliation diffs.
    #[must_use]
    pub fn with_broadcast_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            entitled: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Idempotent upsert from one verified transaction.
    ///
    /// Returns `true` when membership changed (first grant for the product);
    /// re-applying a product refreshes diagnostics and emits nothing.
    pub fn apply(&self, record: &TransactionRecord) -> bool {
        let mut entitled = write_lock(&self.entitled);
        match entitled.entry(record.product_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entitlement = occupied.get_mut();
                entitlement.transaction_id = Some(record.transaction_id);
                entitlement.last_seen = record.purchased_at;
                tracing::debug!(product_id = %record.product_id, "entitlement re-applied");
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Entitlement {
                    product_id: record.product_id.clone(),
                    transaction_id: Some(record.transaction_id),
                    last_seen: record.purchased_at,
                });
                // Emitted under the write lock so event order matches
                // mutation order.
                let _ = self.changes.send(EntitlementEvent::Granted {
                    product_id: record.product_id.clone(),
                });
                metrics::counter!("entitlements.store.granted").increment(1);
                tracing::info!(
                    product_id = %record.product_id,
                    transaction_id = %record.transaction_id,
                    "entitlement granted"
                );
                true
            }
        }
    }

    /// Atomic snapshot replace: the authoritative reconciliation path and the
    /// only way entitlements are removed.
    ///
    /// Emits `Revoked`/`Granted` diffs for every membership change.
    pub fn replace_all(&self, records: &[TransactionRecord]) -> ReconcileDelta {
        let mut next: HashMap<ProductId, Entitlement> = HashMap::with_capacity(records.len());
        for record in records {
            next.insert(
                record.product_id.clone(),
                Entitlement {
                    product_id: record.product_id.clone(),
                    transaction_id: Some(record.transaction_id),
                    last_seen: record.purchased_at,
                },
            );
        }

        let mut entitled = write_lock(&self.entitled);
        let mut delta = ReconcileDelta::default();
        for product_id in entitled.keys() {
            if !next.contains_key(product_id) {
                delta.revoked.push(product_id.clone());
            }
        }
        for product_id in next.keys() {
            if !entitled.contains_key(product_id) {
                delta.granted.push(product_id.clone());
            }
        }
        delta.revoked.sort();
        delta.granted.sort();
        *entitled = next;

        for product_id in &delta.revoked {
            let _ = self.changes.send(EntitlementEvent::Revoked {
                product_id: product_id.clone(),
            });
            metrics::counter!("entitlements.store.revoked").increment(1);
        }
        for product_id in &delta.granted {
            let _ = self.changes.send(EntitlementEvent::Granted {
                product_id: product_id.clone(),
            });
            metrics::counter!("entitlements.store.granted").increment(1);
        }
        if !delta.is_empty() {
            tracing::info!(
                granted = delta.granted.len(),
                revoked = delta.revoked.len(),
                "entitlement set reconciled"
            );
        }
        delta
    }

    /// Seed membership from the persisted snapshot at startup.
    ///
    /// Seeded entries carry no transaction id; the first listener event or
    /// reconciliation supersedes them.
    pub fn seed(&self, product_ids: impl IntoIterator<Item = ProductId>, at: DateTime<Utc>) {
        let mut entitled = write_lock(&self.entitled);
        for product_id in product_ids {
            if let Entry::Vacant(vacant) = entitled.entry(product_id.clone()) {
                vacant.insert(Entitlement {
                    product_id: product_id.clone(),
                    transaction_id: None,
                    last_seen: at,
                });
                let _ = self.changes.send(EntitlementEvent::Granted { product_id });
            }
        }
    }

    /// Whether the product is currently entitled. Cheap; no network, no
    /// allocation; safe to poll on every ad-display decision.
    #[must_use]
    pub fn is_entitled(&self, product_id: &ProductId) -> bool {
        read_lock(&self.entitled).contains_key(product_id)
    }

    /// Whether any product is entitled (the ad-suppression bool).
    #[must_use]
    pub fn any_entitled(&self) -> bool {
        !read_lock(&self.entitled).is_empty()
    }

    /// Ordered view of entitled identifiers, for diagnostics and the
    /// persisted snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<ProductId> {
        read_lock(&self.entitled).keys().cloned().collect()
    }

    /// Diagnostic dump of full entitlement records.
    #[must_use]
    pub fn entitlements(&self) -> Vec<Entitlement> {
        let mut all: Vec<Entitlement> = read_lock(&self.entitled).values().cloned().collect();
        all.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        all
    }

    /// Subscribe to membership changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.changes.subscribe()
    }
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the store's current membership through to the persisted snapshot.
///
/// Best-effort: a failed write is logged and the in-memory store remains
/// authoritative.
pub async fn persist_snapshot<F: FlagStore>(flags: &F, store: &EntitlementStore) {
    if let Err(err) = flags.store(&store.snapshot()).await {
        tracing::warn!(error = %err, "failed to persist entitlement snapshot");
    }
}
