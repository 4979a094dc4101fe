//! Scriptable storefront.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use tokio::sync::mpsc;

use entitlements_core::{
    ProductDescriptor, ProductId, PurchaseReply, StorefrontError, StorefrontService,
    TransactionEnvelope, TransactionId, TransactionStream,
};

type StreamItem = Result<TransactionEnvelope, StorefrontError>;

#[derive(Default)]
struct Inner {
    products: Vec<ProductDescriptor>,
    fail_next_fetch: Option<StorefrontError>,
    purchase_replies: HashMap<ProductId, VecDeque<Result<PurchaseReply, StorefrontError>>>,
    entitlements: Vec<TransactionEnvelope>,
    fail_next_entitlements: Option<StorefrontError>,
    fail_next_subscribe: Option<StorefrontError>,
    latency: Option<Duration>,
    backlog: VecDeque<StreamItem>,
    live: Option<mpsc::UnboundedSender<StreamItem>>,
    finished: Vec<TransactionId>,
    subscribe_count: usize,
    sync_calls: usize,
    fail_sync: bool,
}

/// In-memory [`StorefrontService`] with scriptable behavior.
///
/// Tests drive it directly: set the catalog, queue purchase replies, push
/// feed envelopes, drop the feed connection, and observe which transactions
/// were acknowledged.
///
/// The transaction feed behaves like the real thing: envelopes pushed while
/// a subscriber is connected are delivered live; envelopes pushed while
/// disconnected are queued and redelivered on the next subscribe, the way a
/// storefront redelivers unfinished transactions.
#[derive(Clone, Default)]
pub struct FakeStorefront {
    inner: Arc<Mutex<Inner>>,
}

impl FakeStorefront {
    /// Create a fake with an empty catalog and no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    // ── scripting ──────────────────────────────────────────────────────

    /// Set the catalog returned by `fetch_products`.
    pub fn set_products(&self, products: Vec<ProductDescriptor>) {
        self.lock().products = products;
    }

    /// Fail the next `fetch_products` call with `err`.
    pub fn fail_next_fetch(&self, err: StorefrontError) {
        self.lock().fail_next_fetch = Some(err);
    }

    /// Queue a reply for the next `begin_purchase` of `product`.
    pub fn queue_purchase(
        &self,
        product: impl Into<ProductId>,
        reply: Result<PurchaseReply, StorefrontError>,
    ) {
        self.lock()
            .purchase_replies
            .entry(product.into())
            .or_default()
            .push_back(reply);
    }

    /// Set the snapshot returned by `current_entitlements`.
    pub fn set_entitlements(&self, entitlements: Vec<TransactionEnvelope>) {
        self.lock().entitlements = entitlements;
    }

    /// Fail the next `current_entitlements` call with `err`.
    pub fn fail_next_entitlements(&self, err: StorefrontError) {
        self.lock().fail_next_entitlements = Some(err);
    }

    /// Fail the next `transaction_updates` subscription with `err`.
    pub fn fail_next_subscribe(&self, err: StorefrontError) {
        self.lock().fail_next_subscribe = Some(err);
    }

    /// Add fixed latency to fetch, purchase, and entitlement calls, for
    /// exercising timeout paths.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Make `sync` fail.
    pub fn fail_sync(&self) {
        self.lock().fail_sync = true;
    }

    /// Deliver an envelope on the feed: live if a subscriber is connected,
    /// queued for the next subscribe otherwise.
    pub fn push_update(&self, envelope: TransactionEnvelope) {
        self.push_item(Ok(envelope));
    }

    /// Deliver a transient item error on the feed.
    pub fn push_stream_error(&self, err: StorefrontError) {
        self.push_item(Err(err));
    }

    fn push_item(&self, item: StreamItem) {
        let mut inner = self.lock();
        let item = if let Some(live) = &inner.live {
            match live.send(item) {
                Ok(()) => return,
                Err(returned) => {
                    // Receiver side is gone; treat as disconnected.
                    inner.live = None;
                    returned.0
                }
            }
        } else {
            item
        };
        inner.backlog.push_back(item);
    }

    /// Drop the live feed connection. The subscriber observes end-of-stream
    /// and is expected to resubscribe.
    pub fn disconnect(&self) {
        self.lock().live = None;
    }

    // ── observation ────────────────────────────────────────────────────

    /// Transactions acknowledged via `finish`, in order.
    #[must_use]
    pub fn finished(&self) -> Vec<TransactionId> {
        self.lock().finished.clone()
    }

    /// Number of `transaction_updates` subscription attempts.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.lock().subscribe_count
    }

    /// Number of `sync` calls.
    #[must_use]
    pub fn sync_calls(&self) -> usize {
        self.lock().sync_calls
    }
}

impl StorefrontService for FakeStorefront {
    fn fetch_products(
        &self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<Vec<ProductDescriptor>, StorefrontError>> + Send {
        let this = self.clone();
        let ids = ids.to_vec();
        async move {
            this.simulate_latency().await;
            let mut inner = this.lock();
            if let Some(err) = inner.fail_next_fetch.take() {
                return Err(err);
            }
            let missing: Vec<ProductId> = ids
                .iter()
                .filter(|requested| {
                    !inner.products.iter().any(|product| product.id == **requested)
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(StorefrontError::UnknownProducts { missing });
            }
            Ok(inner
                .products
                .iter()
                .filter(|product| ids.contains(&product.id))
                .cloned()
                .collect())
        }
    }

    fn begin_purchase(
        &self,
        product: &ProductId,
    ) -> impl Future<Output = Result<PurchaseReply, StorefrontError>> + Send {
        let this = self.clone();
        let product = product.clone();
        async move {
            this.simulate_latency().await;
            let reply = this
                .lock()
                .purchase_replies
                .get_mut(&product)
                .and_then(VecDeque::pop_front);
            reply.unwrap_or_else(|| {
                Err(StorefrontError::Transport {
                    detail: format!("no scripted purchase reply for {product}"),
                })
            })
        }
    }

    fn transaction_updates(
        &self,
    ) -> impl Future<Output = Result<TransactionStream, StorefrontError>> + Send {
        let this = self.clone();
        async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut inner = this.lock();
                inner.subscribe_count += 1;
                if let Some(err) = inner.fail_next_subscribe.take() {
                    return Err(err);
                }
                while let Some(item) = inner.backlog.pop_front() {
                    let _ = tx.send(item);
                }
                inner.live = Some(tx);
            }
            let feed: TransactionStream = Box::pin(stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            });
            Ok(feed)
        }
    }

    fn current_entitlements(
        &self,
    ) -> impl Future<Output = Result<Vec<TransactionEnvelope>, StorefrontError>> + Send {
        let this = self.clone();
        async move {
            this.simulate_latency().await;
            let mut inner = this.lock();
            if let Some(err) = inner.fail_next_entitlements.take() {
                return Err(err);
            }
            Ok(inner.entitlements.clone())
        }
    }

    fn sync(&self) -> impl Future<Output = Result<(), StorefrontError>> + Send {
        let this = self.clone();
        async move {
            let mut inner = this.lock();
            inner.sync_calls += 1;
            if inner.fail_sync {
                return Err(StorefrontError::Transport {
                    detail: "injected sync failure".to_owned(),
                });
            }
            Ok(())
        }
    }

    fn finish(
        &self,
        transaction: TransactionId,
    ) -> impl Future<Output = Result<(), StorefrontError>> + Send {
        let this = self.clone();
        async move {
            this.lock().finished.push(transaction);
            Ok(())
        }
    }
}
