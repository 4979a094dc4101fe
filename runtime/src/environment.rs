//! Engine environment.
//!
//! All external collaborators are injected through this struct. It is
//! constructed once at the process composition root and cloned into the
//! components that need it; there is no ambient global instance, so tests
//! build isolated environments around the fakes in `entitlements-testing`.

use entitlements_core::{Clock, FlagStore, StorefrontService};

/// Injected dependencies for the listener and the controller.
///
/// # Type Parameters
///
/// - `S`: Storefront service
/// - `F`: Persisted entitlement snapshot store
/// - `C`: Time source
#[derive(Clone)]
pub struct EntitlementEnvironment<S, F, C>
where
    S: StorefrontService + Clone,
    F: FlagStore + Clone,
    C: Clock + Clone,
{
    /// Storefront service.
    pub storefront: S,

    /// Persisted entitlement snapshot (ad suppression, cold-start gating).
    pub flags: F,

    /// Time source for expiry checks.
    pub clock: C,
}

impl<S, F, C> EntitlementEnvironment<S, F, C>
where
    S: StorefrontService + Clone,
    F: FlagStore + Clone,
    C: Clock + Clone,
{
    /// Create a new environment.
    #[must_use]
    pub const fn new(storefront: S, flags: F, clock: C) -> Self {
        Self {
            storefront,
            flags,
            clock,
        }
    }
}
