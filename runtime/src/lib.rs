//! # Entitlements Runtime
//!
//! The stateful half of the entitlement engine: the entitlement store, the
//! product catalog cache, the supervised transaction listener, and the
//! reconciliation controller that fronts them.
//!
//! ## Control flow
//!
//! ```text
//! callers ──► EntitlementController ──► { ProductCatalog, EntitlementStore }
//!                                             ▲
//! Storefront feed ──► TransactionListener ────┘  (verify → apply → finish)
//! ```
//!
//! The listener runs for the process lifetime and reconnects with backoff
//! whenever the feed drops. The store is the only shared mutable state;
//! its write lock linearizes the listener's `apply` calls with the
//! controller's `replace_all` reconciliation.
//!
//! ## Example
//!
//! ```ignore
//! use entitlements_core::SystemClock;
//! use entitlements_runtime::{EngineConfig, EntitlementController, EntitlementEnvironment};
//!
//! let environment = EntitlementEnvironment::new(storefront, flags, SystemClock);
//! let (controller, listener) = EntitlementController::start(
//!     environment,
//!     EngineConfig::default(),
//! ).await;
//!
//! controller.load_products(&ids).await?;
//! if controller.is_entitled(&premium) {
//!     // suppress ads
//! }
//!
//! // at process exit
//! listener.shutdown().await;
//! ```

/// Reconnect backoff policy for the listener.
pub mod backoff;

/// Product catalog cache.
pub mod catalog;

/// Reconciliation controller (the public API).
pub mod controller;

/// Injected dependencies.
pub mod environment;

/// Supervised transaction listener.
pub mod listener;

/// The entitlement store.
pub mod store;

pub use backoff::ReconnectPolicy;
pub use catalog::ProductCatalog;
pub use controller::{EngineConfig, EntitlementController, EntitlementSnapshot, PurchaseOutcome};
pub use environment::EntitlementEnvironment;
pub use listener::ListenerHandle;
pub use store::{Entitlement, EntitlementStore, ReconcileDelta, persist_snapshot};
