//! Storefront service boundary.
//!
//! The engine never talks to the storefront directly; everything goes through
//! [`StorefrontService`]. Production wires the platform SDK behind this
//! trait, tests wire the scriptable fake from `entitlements-testing`, and the
//! rest of the engine cannot tell the difference.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::error::StorefrontError;
use crate::product::{ProductDescriptor, ProductId};
use crate::transaction::{TransactionEnvelope, TransactionId};

/// Unbounded feed of transaction envelopes.
///
/// The stream does not terminate while the connection is healthy; an ended
/// stream models a dropped connection and the consumer is expected to
/// resubscribe. Ordering is preserved per product but not across products.
/// Item-level errors are transient (one undecodable delivery) and skippable.
pub type TransactionStream =
    Pin<Box<dyn Stream<Item = Result<TransactionEnvelope, StorefrontError>> + Send>>;

/// Storefront reply to a purchase request.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseReply {
    /// The storefront reports success and hands back the signed envelope.
    ///
    /// Success here is the storefront's claim; the envelope still has to pass
    /// verification before it grants anything.
    Success(TransactionEnvelope),

    /// The user backed out of the payment flow.
    UserCancelled,

    /// The purchase needs out-of-band approval and will complete later
    /// through the transaction feed, not through this call.
    Pending,
}

/// The remote storefront: catalog queries, the purchase protocol, the
/// transaction feed, and the entitlement snapshot used by reconciliation.
///
/// All methods may suspend on network I/O. Implementations must be safe to
/// share between the listener task and arbitrary concurrent callers.
pub trait StorefrontService: Send + Sync {
    /// Fetch descriptors for exactly the requested identifiers.
    ///
    /// Response order is the storefront's and must be preserved by callers
    /// that cache it; the catalog uses it for default selection.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::UnknownProducts`] when some identifiers do
    /// not exist, or [`StorefrontError::Transport`] on network failure.
    fn fetch_products(
        &self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<Vec<ProductDescriptor>, StorefrontError>> + Send;

    /// Submit a purchase for one product and wait for the storefront reply.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Denied`] when the storefront refuses the
    /// purchase, or [`StorefrontError::Transport`] on network failure.
    /// User cancellation and pending approval are replies, not errors.
    fn begin_purchase(
        &self,
        product: &ProductId,
    ) -> impl Future<Output = Result<PurchaseReply, StorefrontError>> + Send;

    /// Open the transaction-update feed.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Transport`] when the subscription cannot be
    /// established; the listener retries with backoff.
    fn transaction_updates(
        &self,
    ) -> impl Future<Output = Result<TransactionStream, StorefrontError>> + Send;

    /// Snapshot of every transaction the account is currently entitled by.
    ///
    /// This is the storefront's source of truth; reconciliation replaces the
    /// local set with it wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Transport`] on network failure.
    fn current_entitlements(
        &self,
    ) -> impl Future<Output = Result<Vec<TransactionEnvelope>, StorefrontError>> + Send;

    /// Ask the storefront to refresh and redeliver local transaction state.
    ///
    /// Best-effort: reconciliation invokes it before fetching the snapshot
    /// and treats failure as non-fatal.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Transport`] on network failure.
    fn sync(&self) -> impl Future<Output = Result<(), StorefrontError>> + Send;

    /// Acknowledge a handled transaction so the storefront stops
    /// redelivering it.
    ///
    /// Must be invoked at most once per transaction, and only after the
    /// entitlement grant has been applied. Skipping it is safe: the
    /// storefront redelivers and apply is idempotent. Acknowledging before
    /// applying is not safe and nothing in this workspace does it.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Transport`] on network failure; callers log
    /// and rely on redelivery.
    fn finish(
        &self,
        transaction: TransactionId,
    ) -> impl Future<Output = Result<(), StorefrontError>> + Send;
}
