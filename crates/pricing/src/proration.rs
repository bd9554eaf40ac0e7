//! Mid-period plan change proration
//!
//! Previews the credit for the unused remainder of the current period and the
//! charge for the replacement plan over that same remainder. Day granularity:
//! partial days in progress count as used.

use flowdesk_shared::Money;
use time::OffsetDateTime;

/// Preview of a mid-period plan change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProrationPreview {
    pub days_total: u32,
    pub days_remaining: u32,
    /// Unused portion of the current plan's period amount.
    pub credit: Money,
    /// Remaining-period portion of the new plan's period amount.
    pub charge: Money,
    /// `charge - credit`; negative means money back to the customer.
    pub net: Money,
}

/// Compute a proration preview for switching plans mid-period.
///
/// `current_amount` and `new_amount` are full-period amounts (typically the
/// output of `compute_price` for each plan). Outside the period, `now` clamps:
/// before the period starts everything is remaining, after it ends nothing is.
pub fn proration_preview(
    current_amount: Money,
    new_amount: Money,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
    now: OffsetDateTime,
) -> ProrationPreview {
    let days_total = whole_days_between(period_start, period_end).max(1);
    let days_remaining = if now <= period_start {
        days_total
    } else if now >= period_end {
        0
    } else {
        whole_days_between(now, period_end)
    };

    let credit = prorate(current_amount, days_remaining, days_total);
    let charge = prorate(new_amount, days_remaining, days_total);
    let net = Money::from_cents(charge.cents() - credit.cents());

    ProrationPreview {
        days_total,
        days_remaining,
        credit,
        charge,
        net,
    }
}

fn whole_days_between(start: OffsetDateTime, end: OffsetDateTime) -> u32 {
    let days = (end - start).whole_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

fn prorate(amount: Money, days_remaining: u32, days_total: u32) -> Money {
    // i128 intermediate keeps cents * days well inside range.
    let scaled = amount.cents() as i128 * days_remaining as i128 / days_total as i128;
    Money::from_cents(scaled as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    #[test]
    fn halfway_through_period_credits_half() {
        let preview = proration_preview(
            cents(3000),
            cents(6000),
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-01-31 00:00 UTC),
            datetime!(2026-01-16 00:00 UTC),
        );
        assert_eq!(preview.days_total, 30);
        assert_eq!(preview.days_remaining, 15);
        assert_eq!(preview.credit, cents(1500));
        assert_eq!(preview.charge, cents(3000));
        assert_eq!(preview.net, cents(1500));
    }

    #[test]
    fn downgrade_yields_negative_net() {
        let preview = proration_preview(
            cents(6000),
            cents(3000),
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-01-31 00:00 UTC),
            datetime!(2026-01-16 00:00 UTC),
        );
        assert_eq!(preview.net, cents(-1500));
        assert!(preview.net.is_negative());
    }

    #[test]
    fn after_period_end_nothing_remains() {
        let preview = proration_preview(
            cents(3000),
            cents(6000),
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-01-31 00:00 UTC),
            datetime!(2026-02-10 00:00 UTC),
        );
        assert_eq!(preview.days_remaining, 0);
        assert_eq!(preview.credit, Money::ZERO);
        assert_eq!(preview.charge, Money::ZERO);
    }

    #[test]
    fn before_period_start_everything_remains() {
        let preview = proration_preview(
            cents(3000),
            cents(6000),
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-01-31 00:00 UTC),
            datetime!(2025-12-25 00:00 UTC),
        );
        assert_eq!(preview.days_remaining, preview.days_total);
        assert_eq!(preview.credit, cents(3000));
    }

    #[test]
    fn partial_day_in_progress_counts_as_used() {
        let preview = proration_preview(
            cents(3000),
            cents(3000),
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-01-31 00:00 UTC),
            datetime!(2026-01-16 13:45 UTC),
        );
        assert_eq!(preview.days_remaining, 14);
    }
}
