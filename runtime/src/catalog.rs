//! Product catalog cache.
//!
//! Read-only between refreshes. A failed refresh keeps the previous cache:
//! stale-but-available beats empty when the storefront is briefly
//! unreachable.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use entitlements_core::{CatalogError, ProductDescriptor, ProductId, StorefrontService};

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("catalog lock poisoned on read, recovering");
        PoisonError::into_inner(poisoned)
    })
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("catalog lock poisoned on write, recovering");
        PoisonError::into_inner(poisoned)
    })
}

/// Cloneable handle to the cached product descriptors.
///
/// Descriptor order is the storefront's response order; the first entry is
/// the default selection offered to callers that need one.
#[derive(Clone, Default)]
pub struct ProductCatalog {
    products: Arc<RwLock<Vec<ProductDescriptor>>>,
}

impl ProductCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the storefront for exactly `ids` and replace the cache wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Timeout`] when the round-trip exceeds `bound`,
    /// [`CatalogError::NotFound`] when the storefront does not recognize some
    /// identifiers, or [`CatalogError::Transport`] otherwise. On any error
    /// the previous cache is left untouched.
    pub async fn refresh<S: StorefrontService>(
        &self,
        storefront: &S,
        ids: &[ProductId],
        bound: Duration,
    ) -> Result<Vec<ProductDescriptor>, CatalogError> {
        let fetched = tokio::time::timeout(bound, storefront.fetch_products(ids))
            .await
            .map_err(|_| {
                tracing::warn!(?bound, "catalog refresh timed out");
                CatalogError::Timeout { elapsed: bound }
            })?
            .map_err(CatalogError::from)?;

        *write_lock(&self.products) = fetched.clone();
        tracing::info!(count = fetched.len(), "product catalog refreshed");
        metrics::counter!("entitlements.catalog.refreshed").increment(1);
        Ok(fetched)
    }

    /// The last successful refresh, in storefront order. Empty before the
    /// first successful refresh.
    #[must_use]
    pub fn current(&self) -> Vec<ProductDescriptor> {
        read_lock(&self.products).clone()
    }

    /// Look up one cached descriptor.
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<ProductDescriptor> {
        read_lock(&self.products)
            .iter()
            .find(|product| &product.id == id)
            .cloned()
    }

    /// First descriptor in storefront order, used as the default selection.
    #[must_use]
    pub fn default_selection(&self) -> Option<ProductDescriptor> {
        read_lock(&self.products).first().cloned()
    }

    /// `true` before the first successful refresh.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read_lock(&self.products).is_empty()
    }
}
