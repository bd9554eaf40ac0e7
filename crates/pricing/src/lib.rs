// Pricing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Flowdesk Pricing Module
//!
//! Computes the amount owed for a plan price and a consumed unit count.
//!
//! ## Features
//!
//! - **Flat Rate**: fixed fee regardless of usage
//! - **Per Unit**: fixed fee plus a single per-unit rate
//! - **Tiered Volume**: the matched tier's rate applies to the entire quantity
//! - **Tiered Graduated**: each tier's rate applies only to units inside its band
//! - **Proration**: day-granularity previews for mid-period plan changes
//!
//! Everything here is pure and deterministic: no I/O, no clocks, safe to call
//! from live price-preview endpoints as often as needed. Tier configuration is
//! validated when it is edited (`validate_tiers`); `compute_price` assumes
//! validated input and fails fast with a configuration error otherwise.

pub mod error;
pub mod price;
pub mod proration;
pub mod tiers;


// Error
pub use error::{PricingError, PricingResult, TierOrderingError};

// Price
pub use price::{compute_price, PlanPrice, PriceType};

// Proration
pub use proration::{proration_preview, ProrationPreview};

// Tiers
pub use tiers::{
    tier_for_quantity, units_remaining_in_tier, validate_tiers, PriceTier, TierBound,
};
