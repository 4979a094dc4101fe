//! Transaction envelopes and verified records.
//!
//! An envelope is what the storefront delivers; a record is what the engine
//! trusts. The only path from one to the other is
//! [`verifier::verify`](crate::verifier::verify).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::product::ProductId;

/// Storefront-assigned transaction identifier.
///
/// Monotonically allocated by the storefront per account; renewals get fresh
/// identifiers for the same product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trust marker attached by the storefront's delivery channel.
///
/// The channel performs signature validation before handing an envelope to
/// the application. `Unverified` envelopes are still delivered so the failure
/// can be observed and logged, but they must never grant entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeStatus {
    /// The delivery channel vouches for the payload signature.
    Verified,

    /// Signature validation failed in the delivery channel.
    Unverified {
        /// Channel-reported failure reason. Never contains key material.
        reason: String,
    },
}

/// One purchase or renewal event as delivered by the storefront.
///
/// The payload is opaque until verified: consumers must go through
/// [`verify`](crate::verifier::verify) to obtain a trusted
/// [`TransactionRecord`]. Envelopes are consumed exactly once by whichever
/// path received them (listener, purchase, or restore) and are not retained
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEnvelope {
    /// Delivery-channel trust marker.
    pub status: EnvelopeStatus,

    /// Signed payload bytes: a JSON-encoded [`SignedTransaction`].
    pub payload: Vec<u8>,

    /// SHA-256 digest of `payload`, set when the envelope was sealed.
    pub digest: [u8; 32],
}

impl TransactionEnvelope {
    /// Seal a payload into an envelope, computing its integrity digest.
    #[must_use]
    pub fn seal(status: EnvelopeStatus, payload: Vec<u8>) -> Self {
        let digest = Sha256::digest(&payload).into();
        Self {
            status,
            payload,
            digest,
        }
    }
}

/// Payload schema of a signed transaction.
///
/// This is the structure the storefront signs; [`TransactionEnvelope::payload`]
/// is its JSON encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Storefront transaction identifier.
    pub transaction_id: TransactionId,

    /// Product the transaction grants.
    pub product_id: ProductId,

    /// Purchase or renewal instant.
    pub purchased_at: DateTime<Utc>,

    /// Subscription period end; `None` for non-expiring products.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Verified, trusted view of one transaction.
///
/// Produced only by [`verify`](crate::verifier::verify). Applying a record to
/// the entitlement store is idempotent, so re-delivered transactions are
/// harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// Storefront transaction identifier.
    pub transaction_id: TransactionId,

    /// Product the transaction grants.
    pub product_id: ProductId,

    /// Purchase or renewal instant.
    pub purchased_at: DateTime<Utc>,

    /// Subscription period end; `None` for non-expiring products.
    pub expires_at: Option<DateTime<Utc>>,
}
