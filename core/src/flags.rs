//! Persisted entitlement snapshot (feature-flag store).

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::FlagError;
use crate::product::ProductId;

/// Write-through persistence for the last-known entitled product set.
///
/// Consumers outside the engine (ad suppression, premium gating at cold
/// start) read this store; the engine writes it on every membership change
/// and seeds its in-memory state from it at startup.
///
/// It is a cache, not an authority: the first listener event or restore after
/// startup supersedes whatever was loaded, and every failure here is
/// recovered with a warning.
pub trait FlagStore: Send + Sync {
    /// Load the persisted snapshot, or `None` if nothing was ever stored.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError`] when the backing store is unreadable.
    fn load(
        &self,
    ) -> impl Future<Output = Result<Option<BTreeSet<ProductId>>, FlagError>> + Send;

    /// Replace the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError`] when the write fails; callers continue with the
    /// in-memory state as authority.
    fn store(
        &self,
        entitled: &BTreeSet<ProductId>,
    ) -> impl Future<Output = Result<(), FlagError>> + Send;
}
