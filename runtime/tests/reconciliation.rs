//! Integration tests for the reconciliation controller.
//!
//! Catalog loading with stale-on-error semantics, the purchase protocol and
//! its verification gate, restore as the authoritative (and only) removal
//! path, and the startup seeding flow.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::time::Duration;

use entitlements_core::{
    CatalogError, EntitlementEvent, PlanTier, ProductDescriptor, ProductId, PurchaseError,
    PurchaseReply, RestoreError, StorefrontError, TransactionId, TransactionRecord,
};
use entitlements_runtime::{
    EngineConfig, EntitlementController, EntitlementEnvironment, EntitlementStore, ProductCatalog,
    PurchaseOutcome,
};
use entitlements_testing::{FakeStorefront, FixedClock, MockFlagStore, fixtures, test_clock};
use tokio_test::assert_ok;

type TestController = EntitlementController<FakeStorefront, MockFlagStore, FixedClock>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("entitlements_runtime=debug")
        .with_test_writer()
        .try_init();
}

fn descriptor(id: &str, price: &str) -> ProductDescriptor {
    ProductDescriptor {
        id: ProductId::new(id),
        display_name: id.to_owned(),
        display_price: price.to_owned(),
    }
}

fn plans() -> Vec<ProductDescriptor> {
    vec![
        descriptor("app.plan.weekly", "¥120"),
        descriptor("app.plan.monthly", "¥480"),
        descriptor("app.plan.yearly", "¥4,800"),
    ]
}

fn plan_ids() -> Vec<ProductId> {
    plans().into_iter().map(|product| product.id).collect()
}

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_catalog_timeout(Duration::from_millis(200))
        .with_restore_timeout(Duration::from_millis(200))
        .with_purchase_timeout(Duration::from_millis(200))
}

fn environment(
    storefront: &FakeStorefront,
    flags: &MockFlagStore,
) -> EntitlementEnvironment<FakeStorefront, MockFlagStore, FixedClock> {
    EntitlementEnvironment::new(storefront.clone(), flags.clone(), test_clock())
}

/// Controller plus a handle to its store, for pre-populating streamed state.
fn controller_with_store(
    storefront: &FakeStorefront,
    flags: &MockFlagStore,
) -> (TestController, EntitlementStore) {
    let store = EntitlementStore::new();
    let controller = EntitlementController::new(
        environment(storefront, flags),
        store.clone(),
        ProductCatalog::new(),
        config(),
    );
    (controller, store)
}

fn controller(storefront: &FakeStorefront, flags: &MockFlagStore) -> TestController {
    controller_with_store(storefront, flags).0
}

fn record(transaction_id: u64, product: &str) -> TransactionRecord {
    use entitlements_core::Clock as _;
    TransactionRecord {
        transaction_id: TransactionId(transaction_id),
        product_id: ProductId::new(product),
        purchased_at: test_clock().now(),
        expires_at: None,
    }
}

// ── catalog ────────────────────────────────────────────────────────────

#[tokio::test]
async fn load_products_caches_storefront_order() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_products(plans());
    let controller = controller(&storefront, &MockFlagStore::new());

    let loaded = assert_ok!(controller.load_products(&plan_ids()).await);
    assert_eq!(loaded.len(), 3);
    assert_eq!(controller.products(), loaded);
    assert_eq!(
        controller.default_product().map(|product| product.id),
        Some(ProductId::new("app.plan.weekly"))
    );

    let tiers: Vec<PlanTier> = loaded
        .iter()
        .map(|product| controller.classify(product))
        .collect();
    assert_eq!(tiers, vec![PlanTier::Weekly, PlanTier::Monthly, PlanTier::Yearly]);
}

#[tokio::test]
async fn failed_refresh_retains_previous_catalog() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_products(plans());
    let controller = controller(&storefront, &MockFlagStore::new());

    controller.load_products(&plan_ids()).await.unwrap();

    storefront.fail_next_fetch(StorefrontError::Transport {
        detail: "offline".to_owned(),
    });
    let err = controller.load_products(&plan_ids()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Transport { .. }));

    // Stale-but-available beats empty.
    assert_eq!(controller.products().len(), 3);
}

#[tokio::test]
async fn unknown_products_surface_as_not_found() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_products(plans());
    let controller = controller(&storefront, &MockFlagStore::new());

    let ghost = ProductId::new("app.plan.ghost");
    let err = controller.load_products(&[ghost.clone()]).await.unwrap_err();
    assert_eq!(err, CatalogError::NotFound { missing: vec![ghost] });
    assert!(controller.products().is_empty());
}

#[tokio::test]
async fn catalog_timeout_is_distinguishable_from_transport() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_products(plans());
    storefront.set_latency(Duration::from_millis(100));
    // Tight bound forces the timeout path.
    let controller = TestController::new(
        environment(&storefront, &MockFlagStore::new()),
        EntitlementStore::new(),
        ProductCatalog::new(),
        config().with_catalog_timeout(Duration::from_millis(10)),
    );

    let err = controller.load_products(&plan_ids()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Timeout { .. }));
}

// ── purchase ───────────────────────────────────────────────────────────

#[tokio::test]
async fn purchase_applies_verified_success() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_products(plans());
    let flags = MockFlagStore::new();
    let controller = controller(&storefront, &flags);
    controller.load_products(&plan_ids()).await.unwrap();

    let monthly = ProductId::new("app.plan.monthly");
    storefront.queue_purchase(
        monthly.clone(),
        Ok(PurchaseReply::Success(fixtures::verified_envelope(
            7,
            "app.plan.monthly",
        ))),
    );

    let outcome = controller
        .purchase(&descriptor("app.plan.monthly", "¥480"))
        .await
        .unwrap();
    match outcome {
        PurchaseOutcome::Completed(record) => {
            assert_eq!(record.product_id, monthly);
            assert_eq!(record.transaction_id, TransactionId(7));
        }
        other => panic!("expected completed purchase, got {other:?}"),
    }

    assert!(controller.is_entitled(&monthly));
    assert!(!controller.is_entitled(&ProductId::new("app.plan.yearly")));
    assert_eq!(storefront.finished(), vec![TransactionId(7)]);
    assert!(flags.stored().unwrap().contains(&monthly));
}

#[tokio::test]
async fn unverifiable_success_grants_nothing() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let controller = controller(&storefront, &MockFlagStore::new());

    let monthly = ProductId::new("app.plan.monthly");
    storefront.queue_purchase(
        monthly.clone(),
        Ok(PurchaseReply::Success(fixtures::unverified_envelope(
            8,
            "app.plan.monthly",
        ))),
    );

    let err = controller
        .purchase(&descriptor("app.plan.monthly", "¥480"))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::VerificationFailed(_)));
    assert!(!controller.is_entitled(&monthly));
    assert!(storefront.finished().is_empty());
}

#[tokio::test]
async fn cancellation_and_pending_do_not_mutate_state() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let controller = controller(&storefront, &MockFlagStore::new());
    let monthly = descriptor("app.plan.monthly", "¥480");

    storefront.queue_purchase(monthly.id.clone(), Ok(PurchaseReply::UserCancelled));
    storefront.queue_purchase(monthly.id.clone(), Ok(PurchaseReply::Pending));

    assert_eq!(
        controller.purchase(&monthly).await.unwrap(),
        PurchaseOutcome::UserCancelled
    );
    assert_eq!(
        controller.purchase(&monthly).await.unwrap(),
        PurchaseOutcome::Pending
    );
    assert!(controller.snapshot().is_empty());
    assert!(storefront.finished().is_empty());
}

#[tokio::test]
async fn denied_purchase_maps_to_store_denied() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let controller = controller(&storefront, &MockFlagStore::new());
    let monthly = descriptor("app.plan.monthly", "¥480");

    storefront.queue_purchase(
        monthly.id.clone(),
        Err(StorefrontError::Denied {
            reason: "payment method declined".to_owned(),
        }),
    );

    let err = controller.purchase(&monthly).await.unwrap_err();
    assert!(matches!(err, PurchaseError::StoreDenied { .. }));
}

#[tokio::test]
async fn purchase_timeout_is_distinguishable() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_latency(Duration::from_millis(100));
    let controller = TestController::new(
        environment(&storefront, &MockFlagStore::new()),
        EntitlementStore::new(),
        ProductCatalog::new(),
        config().with_purchase_timeout(Duration::from_millis(10)),
    );

    let err = controller
        .purchase(&descriptor("app.plan.monthly", "¥480"))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::Timeout { .. }));
}

#[tokio::test]
async fn concurrent_purchases_for_different_products_both_land() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let controller = controller(&storefront, &MockFlagStore::new());

    storefront.queue_purchase(
        ProductId::new("app.plan.weekly"),
        Ok(PurchaseReply::Success(fixtures::verified_envelope(
            1,
            "app.plan.weekly",
        ))),
    );
    storefront.queue_purchase(
        ProductId::new("app.plan.yearly"),
        Ok(PurchaseReply::Success(fixtures::verified_envelope(
            2,
            "app.plan.yearly",
        ))),
    );

    let weekly = descriptor("app.plan.weekly", "¥120");
    let yearly = descriptor("app.plan.yearly", "¥4,800");
    let (first, second) = tokio::join!(controller.purchase(&weekly), controller.purchase(&yearly));
    assert!(matches!(first.unwrap(), PurchaseOutcome::Completed(_)));
    assert!(matches!(second.unwrap(), PurchaseOutcome::Completed(_)));

    let entitled = controller.snapshot();
    assert!(entitled.contains(&ProductId::new("app.plan.weekly")));
    assert!(entitled.contains(&ProductId::new("app.plan.yearly")));
    assert_eq!(entitled.len(), 2);
}

// ── restore ────────────────────────────────────────────────────────────

#[tokio::test]
async fn restore_is_authoritative_over_streamed_state() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let (controller, store) = controller_with_store(&storefront, &MockFlagStore::new());

    // Streamed events granted {a, b} since the last reconciliation.
    store.apply(&record(1, "app.plan.a"));
    store.apply(&record(2, "app.plan.b"));

    // The storefront's snapshot says {b, c}.
    storefront.set_entitlements(vec![
        fixtures::verified_envelope(2, "app.plan.b"),
        fixtures::verified_envelope(3, "app.plan.c"),
    ]);

    let snapshot = controller.restore().await.unwrap();
    assert_eq!(snapshot.discarded, 0);
    assert!(!snapshot.entitled.contains(&ProductId::new("app.plan.a")));
    assert!(snapshot.entitled.contains(&ProductId::new("app.plan.b")));
    assert!(snapshot.entitled.contains(&ProductId::new("app.plan.c")));
    assert!(!controller.is_entitled(&ProductId::new("app.plan.a")));
    assert_eq!(storefront.sync_calls(), 1);
}

#[tokio::test]
async fn restore_with_empty_snapshot_revokes_everything() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let flags = MockFlagStore::new();
    let (controller, store) = controller_with_store(&storefront, &flags);
    let mut changes = controller.subscribe();

    store.apply(&record(1, "app.plan.monthly"));
    changes.recv().await.unwrap(); // drain the grant

    storefront.set_entitlements(vec![]);
    let snapshot = controller.restore().await.unwrap();
    assert!(snapshot.entitled.is_empty());
    assert!(!controller.is_entitled(&ProductId::new("app.plan.monthly")));
    assert_eq!(
        changes.recv().await.unwrap(),
        EntitlementEvent::Revoked {
            product_id: ProductId::new("app.plan.monthly")
        }
    );
    assert_eq!(flags.stored(), Some(std::collections::BTreeSet::new()));
}

#[tokio::test]
async fn restore_discards_unverifiable_records() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let controller = controller(&storefront, &MockFlagStore::new());

    storefront.set_entitlements(vec![
        fixtures::verified_envelope(1, "app.plan.monthly"),
        fixtures::corrupted_envelope(2, "app.plan.weekly"),
        fixtures::unverified_envelope(3, "app.plan.yearly"),
    ]);

    let snapshot = controller.restore().await.unwrap();
    assert_eq!(snapshot.discarded, 2);
    assert_eq!(snapshot.entitled.len(), 1);
    assert!(controller.is_entitled(&ProductId::new("app.plan.monthly")));
}

#[tokio::test]
async fn restore_timeout_is_distinguishable() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.set_latency(Duration::from_millis(100));
    let controller = TestController::new(
        environment(&storefront, &MockFlagStore::new()),
        EntitlementStore::new(),
        ProductCatalog::new(),
        config().with_restore_timeout(Duration::from_millis(10)),
    );

    let err = controller.restore().await.unwrap_err();
    assert!(matches!(err, RestoreError::Timeout { .. }));
}

#[tokio::test]
async fn restore_transport_failure_leaves_state_untouched() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let (controller, store) = controller_with_store(&storefront, &MockFlagStore::new());
    store.apply(&record(1, "app.plan.monthly"));

    storefront.fail_next_entitlements(StorefrontError::Transport {
        detail: "offline".to_owned(),
    });
    let err = controller.restore().await.unwrap_err();
    assert!(matches!(err, RestoreError::Transport { .. }));
    assert!(controller.is_entitled(&ProductId::new("app.plan.monthly")));
}

#[tokio::test]
async fn restore_proceeds_when_sync_fails() {
    init_tracing();
    let storefront = FakeStorefront::new();
    storefront.fail_sync();
    storefront.set_entitlements(vec![fixtures::verified_envelope(1, "app.plan.monthly")]);
    let controller = controller(&storefront, &MockFlagStore::new());

    let snapshot = controller.restore().await.unwrap();
    assert_eq!(snapshot.entitled.len(), 1);
    assert_eq!(storefront.sync_calls(), 1);
}

// ── startup ────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_seeds_from_persisted_snapshot_until_superseded() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let flags = MockFlagStore::seeded([ProductId::new("app.plan.monthly")]);

    let (controller, listener) =
        EntitlementController::start(environment(&storefront, &flags), config()).await;

    // Entitled immediately from the cache, before any storefront contact.
    assert!(controller.is_entitled(&ProductId::new("app.plan.monthly")));

    // The first reconciliation supersedes the cache.
    storefront.set_entitlements(vec![]);
    controller.restore().await.unwrap();
    assert!(!controller.is_entitled(&ProductId::new("app.plan.monthly")));

    listener.shutdown().await;
}

#[tokio::test]
async fn start_survives_unreadable_snapshot() {
    init_tracing();
    let storefront = FakeStorefront::new();
    let flags = MockFlagStore::new();
    flags.fail_loads();

    let (controller, listener) =
        EntitlementController::start(environment(&storefront, &flags), config()).await;
    assert!(!controller.any_entitled());

    listener.shutdown().await;
}
