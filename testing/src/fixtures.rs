//! Envelope and payload builders.
//!
//! All fixtures are built relative to [`test_clock`](crate::clock::test_clock)
//! so they verify consistently under it: "valid" envelopes expire 30 days
//! after the test instant, "expired" ones a day before it.

use chrono::Duration;

use entitlements_core::{
    EnvelopeStatus, ProductId, SignedTransaction, TransactionEnvelope, TransactionId,
};

use crate::clock::test_clock;
use entitlements_core::Clock as _;

#[allow(clippy::expect_used)]
fn encode(payload: &SignedTransaction) -> Vec<u8> {
    serde_json::to_vec(payload).expect("signed transaction serialization is infallible")
}

/// Signed payload for `product`, expiring `expires_in` after the test
/// instant (`None` for non-expiring products).
#[must_use]
pub fn signed_transaction(
    transaction_id: u64,
    product: &str,
    expires_in: Option<Duration>,
) -> SignedTransaction {
    let now = test_clock().now();
    SignedTransaction {
        transaction_id: TransactionId(transaction_id),
        product_id: ProductId::new(product),
        purchased_at: now - Duration::hours(1),
        expires_at: expires_in.map(|period| now + period),
    }
}

/// Well-formed, channel-verified envelope valid for 30 days.
#[must_use]
pub fn verified_envelope(transaction_id: u64, product: &str) -> TransactionEnvelope {
    TransactionEnvelope::seal(
        EnvelopeStatus::Verified,
        encode(&signed_transaction(transaction_id, product, Some(Duration::days(30)))),
    )
}

/// Well-formed envelope the delivery channel could not validate.
#[must_use]
pub fn unverified_envelope(transaction_id: u64, product: &str) -> TransactionEnvelope {
    TransactionEnvelope::seal(
        EnvelopeStatus::Unverified {
            reason: "signature check failed".to_owned(),
        },
        encode(&signed_transaction(transaction_id, product, Some(Duration::days(30)))),
    )
}

/// Envelope whose payload was tampered with after sealing (digest mismatch).
#[must_use]
pub fn corrupted_envelope(transaction_id: u64, product: &str) -> TransactionEnvelope {
    let mut envelope = verified_envelope(transaction_id, product);
    envelope.payload[0] ^= 0xff;
    envelope
}

/// Envelope whose payload is not a signed transaction at all.
#[must_use]
pub fn malformed_envelope() -> TransactionEnvelope {
    TransactionEnvelope::seal(EnvelopeStatus::Verified, b"not a signed transaction".to_vec())
}

/// Envelope for a period that ended a day before the test instant.
#[must_use]
pub fn expired_envelope(transaction_id: u64, product: &str) -> TransactionEnvelope {
    TransactionEnvelope::seal(
        EnvelopeStatus::Verified,
        encode(&signed_transaction(transaction_id, product, Some(Duration::days(-1)))),
    )
}
