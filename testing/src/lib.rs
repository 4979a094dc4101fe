//! # Entitlements Testing
//!
//! Scriptable fakes and fixtures for the entitlement engine.
//!
//! This crate provides:
//! - [`FakeStorefront`] - an in-memory storefront with a drivable transaction
//!   feed (push envelopes, inject errors, drop the connection) and observable
//!   side effects (acknowledged transactions, subscription counts)
//! - [`MockFlagStore`] - in-memory persisted snapshot with failure injection
//! - [`FixedClock`] - deterministic time
//! - [`fixtures`] - envelope builders for every verification outcome
//!
//! ## Example
//!
//! ```ignore
//! use entitlements_testing::{FakeStorefront, MockFlagStore, fixtures, test_clock};
//!
//! let storefront = FakeStorefront::new();
//! storefront.push_update(fixtures::verified_envelope(1, "app.plan.monthly"));
//! storefront.disconnect();   // listener reconnects and redrains
//! assert_eq!(storefront.finished(), vec![TransactionId(1)]);
//! ```

/// Deterministic clock.
pub mod clock;

/// Envelope and payload builders.
pub mod fixtures;

/// In-memory flag store.
pub mod flags;

/// Scriptable storefront.
pub mod storefront;

pub use clock::{FixedClock, test_clock};
pub use flags::MockFlagStore;
pub use storefront::FakeStorefront;
