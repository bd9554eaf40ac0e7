//! Plan price model and amount computation

use flowdesk_shared::Money;
use serde::{Deserialize, Serialize};

use crate::error::{PricingError, PricingResult};
use crate::tiers::{validate_tiers, PriceTier, TierBound};

/// How a plan price turns consumed units into an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    /// Fixed fee only; quantity is ignored.
    FlatRate,
    /// Fixed fee plus one rate applied to every unit.
    UsageBasedPerUnit,
    /// The tier the total quantity falls into prices the entire quantity.
    UsageBasedTieredVolume,
    /// Each tier prices only the units inside its band.
    UsageBasedTieredGraduated,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceType::FlatRate => "flat_rate",
            PriceType::UsageBasedPerUnit => "usage_based_per_unit",
            PriceType::UsageBasedTieredVolume => "usage_based_tiered_volume",
            PriceType::UsageBasedTieredGraduated => "usage_based_tiered_graduated",
        }
    }

    pub fn is_tiered(&self) -> bool {
        matches!(
            self,
            PriceType::UsageBasedTieredVolume | PriceType::UsageBasedTieredGraduated
        )
    }
}

impl std::fmt::Display for PriceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price configuration for one plan.
///
/// Immutable once an active subscription snapshot references it; billing
/// changes create a new price and freeze a copy of the old fields on the
/// subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPrice {
    pub price_type: PriceType,
    /// Charged once per period regardless of usage.
    pub fixed_fee: Money,
    /// Required iff `price_type` is `UsageBasedPerUnit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<Money>,
    /// Required (and validated) iff `price_type` is a tiered variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<PriceTier>>,
}

impl PlanPrice {
    pub fn flat_rate(fixed_fee: Money) -> Self {
        Self {
            price_type: PriceType::FlatRate,
            fixed_fee,
            price_per_unit: None,
            tiers: None,
        }
    }

    pub fn per_unit(fixed_fee: Money, price_per_unit: Money) -> Self {
        Self {
            price_type: PriceType::UsageBasedPerUnit,
            fixed_fee,
            price_per_unit: Some(price_per_unit),
            tiers: None,
        }
    }

    pub fn tiered_volume(fixed_fee: Money, tiers: Vec<PriceTier>) -> Self {
        Self {
            price_type: PriceType::UsageBasedTieredVolume,
            fixed_fee,
            price_per_unit: None,
            tiers: Some(tiers),
        }
    }

    pub fn tiered_graduated(fixed_fee: Money, tiers: Vec<PriceTier>) -> Self {
        Self {
            price_type: PriceType::UsageBasedTieredGraduated,
            fixed_fee,
            price_per_unit: None,
            tiers: Some(tiers),
        }
    }

    /// Configuration-time validation gate.
    ///
    /// Called when an operator edits a plan price; `compute_price` assumes
    /// this has passed and fails fast otherwise.
    pub fn validate(&self) -> PricingResult<()> {
        match self.price_type {
            PriceType::FlatRate => Ok(()),
            PriceType::UsageBasedPerUnit => {
                if self.price_per_unit.is_none() {
                    return Err(PricingError::MissingUnitPrice);
                }
                Ok(())
            }
            PriceType::UsageBasedTieredVolume | PriceType::UsageBasedTieredGraduated => {
                let tiers = self.tiers.as_deref().ok_or(PricingError::MissingTiers)?;
                validate_tiers(tiers)?;
                Ok(())
            }
        }
    }

    fn tiers_checked(&self) -> PricingResult<&[PriceTier]> {
        let tiers = self.tiers.as_deref().ok_or(PricingError::MissingTiers)?;
        validate_tiers(tiers)?;
        Ok(tiers)
    }
}

/// Compute the amount owed for `quantity` consumed units.
///
/// Pure and deterministic: no side effects, safe for live preview UIs to
/// call repeatedly. Malformed configuration (which `PlanPrice::validate`
/// rejects at edit time) surfaces as `PricingError::Configuration` rather
/// than a silently guessed amount.
pub fn compute_price(price: &PlanPrice, quantity: u64) -> PricingResult<Money> {
    match price.price_type {
        PriceType::FlatRate => Ok(price.fixed_fee),

        PriceType::UsageBasedPerUnit => {
            let per_unit = price.price_per_unit.ok_or(PricingError::MissingUnitPrice)?;
            let usage = per_unit
                .times(quantity)
                .ok_or(PricingError::AmountOverflow)?;
            price
                .fixed_fee
                .checked_add(usage)
                .ok_or(PricingError::AmountOverflow)
        }

        PriceType::UsageBasedTieredVolume => {
            let tiers = price.tiers_checked()?;
            compute_volume(price.fixed_fee, tiers, quantity)
        }

        PriceType::UsageBasedTieredGraduated => {
            let tiers = price.tiers_checked()?;
            compute_graduated(price.fixed_fee, tiers, quantity)
        }
    }
}

/// Volume tiering: the first tier whose inclusive bound covers the total
/// quantity prices every unit.
fn compute_volume(fixed_fee: Money, tiers: &[PriceTier], quantity: u64) -> PricingResult<Money> {
    // Validated sequences always end in an unbounded tier, so a match exists.
    let matched = tiers
        .iter()
        .find(|tier| tier.bound.covers(quantity))
        .ok_or(PricingError::Configuration(
            crate::error::TierOrderingError::LastTierBounded,
        ))?;

    let usage = matched
        .per_unit
        .times(quantity)
        .ok_or(PricingError::AmountOverflow)?;

    fixed_fee
        .checked_add(matched.flat_fee)
        .and_then(|sum| sum.checked_add(usage))
        .ok_or(PricingError::AmountOverflow)
}

/// Graduated tiering: walk bands in order, charging each band's rate for the
/// units that land inside it. A band's flat fee is charged iff the band is
/// reached, i.e. units remain when processing begins.
fn compute_graduated(fixed_fee: Money, tiers: &[PriceTier], quantity: u64) -> PricingResult<Money> {
    let mut total = fixed_fee;
    let mut remaining = quantity;
    let mut previous_bound: u64 = 0;

    for tier in tiers {
        if remaining == 0 {
            break;
        }

        let units_in_tier = match tier.bound {
            TierBound::Bounded(until) => remaining.min(until - previous_bound),
            TierBound::Unbounded => remaining,
        };

        let usage = tier
            .per_unit
            .times(units_in_tier)
            .ok_or(PricingError::AmountOverflow)?;

        total = total
            .checked_add(tier.flat_fee)
            .and_then(|sum| sum.checked_add(usage))
            .ok_or(PricingError::AmountOverflow)?;

        remaining -= units_in_tier;
        if let TierBound::Bounded(until) = tier.bound {
            previous_bound = until;
        }
    }

    Ok(total)
}
