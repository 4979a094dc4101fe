//! Error taxonomy for the entitlement engine.
//!
//! One enum per caller-facing concern, plus [`StorefrontError`] at the
//! service boundary. Every storefront or verification failure is recovered
//! somewhere: the listener logs and continues, the controller converts to one
//! of these typed results. Nothing in this workspace panics on a bad
//! transaction.

use std::time::Duration;

use thiserror::Error;

use crate::product::ProductId;

/// Transport-level failure at the storefront service boundary.
///
/// Returned by every [`StorefrontService`](crate::storefront::StorefrontService)
/// method; the controller maps it into the caller-facing taxonomies below.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorefrontError {
    /// Network or session failure talking to the storefront.
    #[error("storefront transport failure: {detail}")]
    Transport {
        /// Underlying failure description.
        detail: String,
    },

    /// The storefront refused the request.
    #[error("storefront denied the request: {reason}")]
    Denied {
        /// Storefront-reported reason.
        reason: String,
    },

    /// The storefront has no record of some requested products.
    #[error("unknown products: {missing:?}")]
    UnknownProducts {
        /// Identifiers the storefront did not recognize.
        missing: Vec<ProductId>,
    },
}

/// Catalog refresh failure. Non-fatal: the previous cache is retained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Network or storefront failure; the stale cache remains available.
    #[error("catalog refresh failed: {detail}")]
    Transport {
        /// Underlying failure description.
        detail: String,
    },

    /// The refresh did not complete within the configured bound.
    #[error("catalog refresh timed out after {elapsed:?}")]
    Timeout {
        /// Configured bound that elapsed.
        elapsed: Duration,
    },

    /// Some requested identifiers do not exist on the storefront.
    #[error("products not found: {missing:?}")]
    NotFound {
        /// Identifiers the storefront did not recognize.
        missing: Vec<ProductId>,
    },
}

impl From<StorefrontError> for CatalogError {
    fn from(err: StorefrontError) -> Self {
        match err {
            StorefrontError::Transport { detail } => Self::Transport { detail },
            StorefrontError::Denied { reason } => Self::Transport { detail: reason },
            StorefrontError::UnknownProducts { missing } => Self::NotFound { missing },
        }
    }
}

/// Per-record verification failure.
///
/// Carries enough context to log (the product identifier when it was
/// parseable, and a reason) and never any secret material. A record that
/// fails verification is dropped: never applied, never acknowledged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// The envelope is structurally broken: digest mismatch, unparseable
    /// payload, or missing required fields.
    #[error("malformed transaction envelope: {detail}")]
    Malformed {
        /// What failed to parse or validate.
        detail: String,
    },

    /// The delivery channel could not validate the payload signature.
    #[error("untrusted transaction envelope: {reason}")]
    Untrusted {
        /// Channel-reported reason.
        reason: String,
        /// Product identifier, when the payload was still parseable.
        product_id: Option<ProductId>,
    },

    /// The subscription period ended before the verification instant.
    #[error("transaction for {product_id} expired at {expired_at}")]
    Expired {
        /// Product the expired transaction was for.
        product_id: ProductId,
        /// When the period ended.
        expired_at: chrono::DateTime<chrono::Utc>,
    },
}

impl VerificationError {
    /// The product this failure concerns, when it was parseable.
    #[must_use]
    pub const fn product_id(&self) -> Option<&ProductId> {
        match self {
            Self::Malformed { .. } => None,
            Self::Untrusted { product_id, .. } => product_id.as_ref(),
            Self::Expired { product_id, .. } => Some(product_id),
        }
    }
}

/// Purchase failure, surfaced to the caller as a typed result.
///
/// Distinguishable from user cancellation and pending approval, which are
/// successful outcomes (`PurchaseOutcome`), not errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PurchaseError {
    /// Network or session failure submitting the purchase.
    #[error("purchase transport failure: {detail}")]
    Transport {
        /// Underlying failure description.
        detail: String,
    },

    /// The storefront reported success but the envelope failed verification.
    /// The transaction was not applied and not acknowledged.
    #[error("purchase verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),

    /// The storefront refused the purchase.
    #[error("purchase denied: {reason}")]
    StoreDenied {
        /// Storefront-reported reason.
        reason: String,
    },

    /// The purchase did not complete within the configured bound.
    #[error("purchase timed out after {elapsed:?}")]
    Timeout {
        /// Configured bound that elapsed.
        elapsed: Duration,
    },
}

impl From<StorefrontError> for PurchaseError {
    fn from(err: StorefrontError) -> Self {
        match err {
            StorefrontError::Transport { detail } => Self::Transport { detail },
            StorefrontError::Denied { reason } => Self::StoreDenied { reason },
            StorefrontError::UnknownProducts { missing } => Self::StoreDenied {
                reason: format!("unknown products: {missing:?}"),
            },
        }
    }
}

/// Reconciliation (restore) failure.
///
/// Verification failures are not restore failures: unverifiable records in
/// the snapshot are discarded individually and the rest is applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RestoreError {
    /// Network or session failure fetching the entitlement snapshot.
    #[error("restore transport failure: {detail}")]
    Transport {
        /// Underlying failure description.
        detail: String,
    },

    /// The snapshot fetch did not complete within the configured bound.
    #[error("restore timed out after {elapsed:?}")]
    Timeout {
        /// Configured bound that elapsed.
        elapsed: Duration,
    },
}

impl From<StorefrontError> for RestoreError {
    fn from(err: StorefrontError) -> Self {
        match err {
            StorefrontError::Transport { detail } => Self::Transport { detail },
            StorefrontError::Denied { reason } => Self::Transport { detail: reason },
            StorefrontError::UnknownProducts { missing } => Self::Transport {
                detail: format!("unknown products: {missing:?}"),
            },
        }
    }
}

/// Failure reading or writing the persisted entitlement snapshot.
///
/// The flag store is a write-through cache; every failure is recovered with a
/// warning and the in-memory store remains authoritative.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("flag store failure: {0}")]
pub struct FlagError(pub String);
