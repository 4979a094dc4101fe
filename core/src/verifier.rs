//! Transaction verification.
//!
//! [`verify`] is the trust boundary of the engine: nothing reaches the
//! entitlement store without passing it, and nothing that fails it is ever
//! acknowledged back to the storefront. It is deliberately a pure function
//! with no state and no I/O, so the listener and the purchase path can call
//! it concurrently without synchronization.

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};

use crate::error::VerificationError;
use crate::transaction::{
    EnvelopeStatus, SignedTransaction, TransactionEnvelope, TransactionRecord,
};

/// Validate an envelope and produce the trusted record.
///
/// Checks, in order: payload integrity digest, the delivery channel's trust
/// marker, payload structure, and expiry against `now`. The first failure
/// wins and the envelope is rejected. Anything ambiguous rejects: granting
/// unverified entitlement is the one unrecoverable failure this function
/// exists to prevent, while a false rejection is always recoverable through
/// storefront redelivery.
///
/// Identical input yields identical output for a fixed `now`.
///
/// # Errors
///
/// - [`VerificationError::Malformed`] - digest mismatch, unparseable payload,
///   or an empty product identifier.
/// - [`VerificationError::Untrusted`] - the delivery channel could not
///   validate the signature; carries the product identifier when the payload
///   was still parseable.
/// - [`VerificationError::Expired`] - the subscription period ended at or
///   before `now`.
pub fn verify(
    envelope: &TransactionEnvelope,
    now: DateTime<Utc>,
) -> Result<TransactionRecord, VerificationError> {
    let computed: [u8; 32] = Sha256::digest(&envelope.payload).into();
    if !constant_time_eq(&computed, &envelope.digest) {
        return Err(VerificationError::Malformed {
            detail: "payload digest mismatch".to_owned(),
        });
    }

    if let EnvelopeStatus::Unverified { reason } = &envelope.status {
        // Best-effort product context for the log line; trust is already gone.
        let product_id = serde_json::from_slice::<SignedTransaction>(&envelope.payload)
            .ok()
            .map(|signed| signed.product_id);
        return Err(VerificationError::Untrusted {
            reason: reason.clone(),
            product_id,
        });
    }

    let signed: SignedTransaction =
        serde_json::from_slice(&envelope.payload).map_err(|err| VerificationError::Malformed {
            detail: format!("payload is not a signed transaction: {err}"),
        })?;

    if signed.product_id.is_empty() {
        return Err(VerificationError::Malformed {
            detail: "empty product identifier".to_owned(),
        });
    }

    if let Some(expires_at) = signed.expires_at {
        if expires_at <= now {
            return Err(VerificationError::Expired {
                product_id: signed.product_id,
                expired_at: expires_at,
            });
        }
    }

    Ok(TransactionRecord {
        transaction_id: signed.transaction_id,
        product_id: signed.product_id,
        purchased_at: signed.purchased_at,
        expires_at: signed.expires_at,
    })
}
