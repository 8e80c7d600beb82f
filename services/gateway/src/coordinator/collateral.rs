//! Required collateral for a freeze quote

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use types::errors::OrderError;
use types::market::MarketConfig;
use types::numeric::{Price, Quantity};

/// Initial margin for `size` at `price`, in collateral base units
///
/// `notional × imr_bps / 10_000`, rounded up to a whole base unit.
pub fn required_collateral(
    market: &MarketConfig,
    size: Quantity,
    price: Price,
    decimals: u32,
) -> Result<u64, OrderError> {
    let scale = Decimal::from(10u64.checked_pow(decimals).ok_or_else(|| overflow(market))?);
    size.as_decimal()
        .checked_mul(price.as_decimal())
        .and_then(|notional| notional.checked_mul(Decimal::from(market.imr_bps)))
        .map(|scaled| scaled / Decimal::from(10_000))
        .and_then(|margin| margin.checked_mul(scale))
        .map(|units| units.round_dp_with_strategy(0, RoundingStrategy::AwayFromZero))
        .and_then(|units| units.to_u64())
        .ok_or_else(|| overflow(market))
}

fn overflow(market: &MarketConfig) -> OrderError {
    OrderError::InvalidParameters(format!(
        "order notional too large for market {}",
        market.market_id
    ))
}
