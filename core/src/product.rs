//! Product catalog types.
//!
//! Descriptors are immutable snapshots of what the storefront sells. The
//! billing-period classification is derived from the identifier on demand and
//! never stored alongside it.

use serde::{Deserialize, Serialize};

/// Storefront-global product identifier.
///
/// Identifiers are opaque strings assigned by the storefront
/// (e.g. `"com.example.premium.monthly"`). Ordering is lexicographic and is
/// used only to keep diagnostic snapshots deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a product identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if the identifier is empty. An empty identifier is never valid
    /// for a real product and is rejected at verification.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Immutable product descriptor as returned by the storefront catalog.
///
/// The catalog cache replaces descriptors wholesale on every refresh; nothing
/// mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDescriptor {
    /// Storefront identifier.
    pub id: ProductId,

    /// Human-readable product name.
    pub display_name: String,

    /// Localized, pre-formatted price string as the storefront rendered it.
    pub display_price: String,
}

/// Billing-period classification derived from a product identifier.
///
/// This is a display concern layered on top of catalog data. It must never
/// gate entitlement decisions; membership in the entitlement store is the
/// only authority there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanTier {
    /// Weekly-renewing plan.
    Weekly,

    /// Monthly-renewing plan.
    Monthly,

    /// Yearly-renewing plan.
    Yearly,

    /// The identifier matched no known period substring.
    Unknown,
}

impl PlanTier {
    /// Classify an identifier by substring match.
    ///
    /// # Examples
    ///
    /// ```
    /// use entitlements_core::product::{PlanTier, ProductId};
    ///
    /// let id = ProductId::new("com.example.premium.monthly");
    /// assert_eq!(PlanTier::from_identifier(&id), PlanTier::Monthly);
    /// ```
    #[must_use]
    pub fn from_identifier(id: &ProductId) -> Self {
        let id = id.as_str().to_ascii_lowercase();
        if id.contains("weekly") {
            Self::Weekly
        } else if id.contains("monthly") {
            Self::Monthly
        } else if id.contains("yearly") || id.contains("annual") {
            Self::Yearly
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
