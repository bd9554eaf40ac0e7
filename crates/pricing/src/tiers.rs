//! Price tier model and validation
//!
//! A tier sequence is an ordered list of bands over consumed units. Every
//! valid sequence ends in exactly one unbounded tier, and the bounded tier
//! boundaries strictly increase. Boundaries are inclusive: a quantity equal
//! to a tier's bound still belongs to that tier.

use flowdesk_shared::Money;
use serde::{Deserialize, Serialize};

use crate::error::TierOrderingError;

/// Upper boundary of a price tier.
///
/// `Unbounded` is a real variant, not a large numeric cap, so "no limit"
/// survives serialization and can never collide with a genuine unit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum TierBound {
    /// Inclusive upper boundary in units.
    Bounded(u64),
    /// Covers every quantity above the previous tier's boundary.
    Unbounded,
}

impl TierBound {
    pub fn is_unbounded(self) -> bool {
        matches!(self, TierBound::Unbounded)
    }

    /// Inclusive boundary check: does `quantity` fall at or below this bound?
    pub fn covers(self, quantity: u64) -> bool {
        match self {
            TierBound::Bounded(until) => quantity <= until,
            TierBound::Unbounded => true,
        }
    }
}

// Wire format: `null` (or absent) means unbounded.
impl From<Option<u64>> for TierBound {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(until) => TierBound::Bounded(until),
            None => TierBound::Unbounded,
        }
    }
}

impl From<TierBound> for Option<u64> {
    fn from(value: TierBound) -> Self {
        match value {
            TierBound::Bounded(until) => Some(until),
            TierBound::Unbounded => None,
        }
    }
}

impl std::fmt::Display for TierBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierBound::Bounded(until) => write!(f, "{}", until),
            TierBound::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// One band of a tiered price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// Inclusive upper boundary of this band, or unbounded for the last tier.
    #[serde(rename = "until_unit")]
    pub bound: TierBound,
    /// Rate charged per unit in this band.
    pub per_unit: Money,
    /// Charged once when the band is entered.
    pub flat_fee: Money,
}

impl PriceTier {
    pub fn new(bound: TierBound, per_unit: Money, flat_fee: Money) -> Self {
        Self {
            bound,
            per_unit,
            flat_fee,
        }
    }
}

/// Validate a tier sequence at configuration time.
///
/// Accepts iff the sequence is non-empty, bounded boundaries are positive and
/// strictly increase, and exactly one tier is unbounded and it is the last.
pub fn validate_tiers(tiers: &[PriceTier]) -> Result<(), TierOrderingError> {
    let Some((last, init)) = tiers.split_last() else {
        return Err(TierOrderingError::Empty);
    };

    if !last.bound.is_unbounded() {
        // Distinguish "the open-ended tier sits in the middle" from "there
        // is no open-ended tier at all".
        if init.iter().any(|tier| tier.bound.is_unbounded()) {
            return Err(TierOrderingError::UnboundedNotLast);
        }
        return Err(TierOrderingError::LastTierBounded);
    }

    let mut previous: Option<u64> = None;
    for tier in init {
        let until = match tier.bound {
            TierBound::Bounded(until) => until,
            // A second unbounded tier is both "not last" and "multiple";
            // report it as multiple since the trailing one is already valid.
            TierBound::Unbounded => return Err(TierOrderingError::MultipleUnbounded),
        };

        if until == 0 {
            return Err(TierOrderingError::ZeroBound);
        }

        if let Some(prev) = previous {
            if until <= prev {
                return Err(TierOrderingError::NonAscending {
                    previous: prev,
                    current: until,
                });
            }
        }
        previous = Some(until);
    }

    Ok(())
}

/// Find the tier a total quantity falls into (volume semantics).
///
/// Boundaries are inclusive, so quantity 5 matches a tier bounded at 5.
/// Returns the tier index along with the tier. Assumes a validated sequence;
/// a malformed one is reported as a configuration error by the caller.
pub fn tier_for_quantity(
    tiers: &[PriceTier],
    quantity: u64,
) -> Result<(usize, &PriceTier), TierOrderingError> {
    validate_tiers(tiers)?;

    for (index, tier) in tiers.iter().enumerate() {
        if tier.bound.covers(quantity) {
            return Ok((index, tier));
        }
    }

    // Unreachable on validated input: the last tier covers everything.
    Err(TierOrderingError::LastTierBounded)
}

/// Units left before a quantity crosses into the next tier.
///
/// `None` means the matched tier is unbounded: there is no "next tier" and no
/// numeric cap standing in for infinity.
pub fn units_remaining_in_tier(
    tiers: &[PriceTier],
    quantity: u64,
) -> Result<Option<u64>, TierOrderingError> {
    let (_, tier) = tier_for_quantity(tiers, quantity)?;
    Ok(match tier.bound {
        TierBound::Bounded(until) => Some(until - quantity),
        TierBound::Unbounded => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn tier(bound: TierBound, per_unit: i64, flat: i64) -> PriceTier {
        PriceTier::new(bound, cents(per_unit), cents(flat))
    }

    #[test]
    fn accepts_single_unbounded_tier() {
        let tiers = vec![tier(TierBound::Unbounded, 10, 0)];
        assert!(validate_tiers(&tiers).is_ok());
    }

    #[test]
    fn accepts_ascending_sequence() {
        let tiers = vec![
            tier(TierBound::Bounded(10), 30, 0),
            tier(TierBound::Bounded(100), 20, 0),
            tier(TierBound::Unbounded, 10, 0),
        ];
        assert!(validate_tiers(&tiers).is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_tiers(&[]), Err(TierOrderingError::Empty));
    }

    #[test]
    fn rejects_bounded_last_tier() {
        let tiers = vec![tier(TierBound::Bounded(10), 30, 0)];
        assert_eq!(
            validate_tiers(&tiers),
            Err(TierOrderingError::LastTierBounded)
        );
    }

    #[test]
    fn rejects_unbounded_tier_in_the_middle() {
        let tiers = vec![
            tier(TierBound::Unbounded, 30, 0),
            tier(TierBound::Bounded(10), 20, 0),
        ];
        assert_eq!(
            validate_tiers(&tiers),
            Err(TierOrderingError::UnboundedNotLast)
        );
    }

    #[test]
    fn rejects_two_unbounded_tiers() {
        let tiers = vec![
            tier(TierBound::Unbounded, 30, 0),
            tier(TierBound::Unbounded, 10, 0),
        ];
        assert_eq!(
            validate_tiers(&tiers),
            Err(TierOrderingError::MultipleUnbounded)
        );
    }

    #[test]
    fn rejects_equal_bounds() {
        let tiers = vec![
            tier(TierBound::Bounded(10), 30, 0),
            tier(TierBound::Bounded(10), 20, 0),
            tier(TierBound::Unbounded, 10, 0),
        ];
        assert_eq!(
            validate_tiers(&tiers),
            Err(TierOrderingError::NonAscending {
                previous: 10,
                current: 10
            })
        );
    }

    #[test]
    fn rejects_zero_bound() {
        let tiers = vec![
            tier(TierBound::Bounded(0), 30, 0),
            tier(TierBound::Unbounded, 10, 0),
        ];
        assert_eq!(validate_tiers(&tiers), Err(TierOrderingError::ZeroBound));
    }

    #[test]
    fn boundary_is_inclusive() {
        let tiers = vec![
            tier(TierBound::Bounded(5), 0, 0),
            tier(TierBound::Unbounded, 10, 100),
        ];
        let (index, _) = tier_for_quantity(&tiers, 5).unwrap();
        assert_eq!(index, 0, "quantity at the bound stays in that tier");
        let (index, _) = tier_for_quantity(&tiers, 6).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn remaining_units_is_none_in_unbounded_tier() {
        let tiers = vec![
            tier(TierBound::Bounded(5), 0, 0),
            tier(TierBound::Unbounded, 10, 0),
        ];
        assert_eq!(units_remaining_in_tier(&tiers, 3).unwrap(), Some(2));
        assert_eq!(units_remaining_in_tier(&tiers, 5).unwrap(), Some(0));
        assert_eq!(units_remaining_in_tier(&tiers, 6).unwrap(), None);
    }

    #[test]
    fn tier_bound_serde_null_is_unbounded() {
        let json = r#"{"until_unit":null,"per_unit":10,"flat_fee":0}"#;
        let parsed: PriceTier = serde_json::from_str(json).unwrap();
        assert!(parsed.bound.is_unbounded());

        let json = r#"{"until_unit":25,"per_unit":10,"flat_fee":5}"#;
        let parsed: PriceTier = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.bound, TierBound::Bounded(25));
    }
}
