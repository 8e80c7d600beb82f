//! Fee tier types
//!
//! Rates are in basis points. The tier is picked from the trader's cumulative
//! matched notional in the market.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One volume tier of a market's fee schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Cumulative notional at which this tier starts
    pub volume_threshold: Decimal,
    /// Can be negative (rebate)
    pub maker_bps: i32,
    pub taker_bps: u32,
}

/// Select the tier for a trader's volume from tiers sorted ascending.
///
/// Falls back to zero fees when the schedule is empty.
pub fn tier_for(tiers: &[FeeTier], volume: Decimal) -> FeeTier {
    tiers
        .iter()
        .filter(|tier| tier.volume_threshold <= volume)
        .max_by(|a, b| a.volume_threshold.cmp(&b.volume_threshold))
        .cloned()
        .unwrap_or(FeeTier {
            volume_threshold: Decimal::ZERO,
            maker_bps: 0,
            taker_bps: 0,
        })
}

/// Standard fee tiers
pub fn default_fee_tiers() -> Vec<FeeTier> {
    vec![
        // Tier 0: < 1M volume
        FeeTier {
            volume_threshold: Decimal::ZERO,
            maker_bps: 2,
            taker_bps: 5,
        },
        // Tier 1: 1M - 10M
        FeeTier {
            volume_threshold: Decimal::from(1_000_000),
            maker_bps: 1,
            taker_bps: 4,
        },
        // Tier 2: > 10M (maker rebate)
        FeeTier {
            volume_threshold: Decimal::from(10_000_000),
            maker_bps: -1,
            taker_bps: 3,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection() {
        let tiers = default_fee_tiers();
        assert_eq!(tier_for(&tiers, Decimal::ZERO).taker_bps, 5);
        assert_eq!(tier_for(&tiers, Decimal::from(1_000_000)).taker_bps, 4);
        assert_eq!(tier_for(&tiers, Decimal::from(50_000_000)).maker_bps, -1);
    }

    #[test]
    fn test_empty_schedule_is_free() {
        let tier = tier_for(&[], Decimal::from(10));
        assert_eq!(tier.taker_bps, 0);
        assert_eq!(tier.maker_bps, 0);
    }
}
