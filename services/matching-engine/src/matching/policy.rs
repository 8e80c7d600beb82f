//! Pre-match order policy
//!
//! Every check here runs before the book is touched, so a rejection never
//! leaves a partial fill behind.

use rust_decimal::Decimal;
use types::errors::OrderError;
use types::order::{Order, TimeInForce};

use crate::book::OrderBook;
use crate::positions::PositionLedger;

/// Apply post-only, fill-or-kill and reduce-only rules to an incoming order
pub fn check_pre_match(
    book: &OrderBook,
    order: &Order,
    positions: &PositionLedger,
) -> Result<(), OrderError> {
    if order.flags.post_only {
        let price = order.limit_price().ok_or_else(|| {
            OrderError::InvalidParameters("post-only requires a limit price".to_string())
        })?;
        if book.would_cross(order.side, price) {
            return Err(OrderError::PostOnlyWouldCross);
        }
    }

    if order.time_in_force == TimeInForce::FOK {
        let wanted = order.remaining();
        let available = book.available_liquidity(order.side, order.limit_price(), wanted);
        if available < wanted {
            return Err(OrderError::FokUnfillable {
                requested: wanted.to_string(),
                available: available.to_string(),
            });
        }
    }

    if order.flags.reduce_only {
        // Resting reduce-only orders already claim part of the position
        let claimed = book.resting_reduce_only(&order.user_address, order.side);
        let exposure = (positions.opposite_exposure(&order.user_address, order.side) - claimed).max(Decimal::ZERO);
        if order.remaining().as_decimal() > exposure {
            return Err(OrderError::ReduceOnlyViolation {
                size: order.remaining().to_string(),
                exposure: exposure.normalize().to_string(),
            });
        }
    }

    Ok(())
}
