//! Pricing error types

use thiserror::Error;

/// Why a tier sequence was rejected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierOrderingError {
    #[error("tier sequence is empty")]
    Empty,

    #[error("last tier must be unbounded")]
    LastTierBounded,

    #[error("only the last tier may be unbounded")]
    UnboundedNotLast,

    #[error("more than one unbounded tier")]
    MultipleUnbounded,

    #[error("tier bound must be a positive unit count")]
    ZeroBound,

    #[error("tier bounds must strictly increase ({previous} then {current})")]
    NonAscending { previous: u64, current: u64 },
}

#[derive(Debug, Error)]
pub enum PricingError {
    /// Malformed price configuration reached compute time. These are caught
    /// at edit time by `PlanPrice::validate`; hitting one here means a
    /// configuration was persisted without validation.
    #[error("price configuration invalid: {0}")]
    Configuration(#[from] TierOrderingError),

    #[error("per-unit price type requires price_per_unit")]
    MissingUnitPrice,

    #[error("tiered price type requires a tier sequence")]
    MissingTiers,

    #[error("amount overflows the money range")]
    AmountOverflow,
}

pub type PricingResult<T> = Result<T, PricingError>;
