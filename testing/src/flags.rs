//! In-memory flag store.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use entitlements_core::{FlagError, FlagStore, ProductId};

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<BTreeSet<ProductId>>,
    writes: usize,
    fail_loads: bool,
    fail_writes: bool,
}

/// In-memory [`FlagStore`] with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockFlagStore {
    inner: Arc<Mutex<Inner>>,
}

impl MockFlagStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a persisted snapshot, as if a previous
    /// process run had written it.
    #[must_use]
    pub fn seeded(entitled: impl IntoIterator<Item = ProductId>) -> Self {
        let store = Self::new();
        store.lock().snapshot = Some(entitled.into_iter().collect());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The currently persisted snapshot, if any.
    #[must_use]
    pub fn stored(&self) -> Option<BTreeSet<ProductId>> {
        self.lock().snapshot.clone()
    }

    /// Number of completed writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Make subsequent loads fail.
    pub fn fail_loads(&self) {
        self.lock().fail_loads = true;
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }
}

impl FlagStore for MockFlagStore {
    fn load(
        &self,
    ) -> impl Future<Output = Result<Option<BTreeSet<ProductId>>, FlagError>> + Send {
        let this = self.clone();
        async move {
            let inner = this.lock();
            if inner.fail_loads {
                return Err(FlagError("injected load failure".to_owned()));
            }
            Ok(inner.snapshot.clone())
        }
    }

    fn store(
        &self,
        entitled: &BTreeSet<ProductId>,
    ) -> impl Future<Output = Result<(), FlagError>> + Send {
        let this = self.clone();
        let entitled = entitled.clone();
        async move {
            let mut inner = this.lock();
            if inner.fail_writes {
                return Err(FlagError("injected write failure".to_owned()));
            }
            inner.writes += 1;
            inner.snapshot = Some(entitled);
            Ok(())
        }
    }
}
