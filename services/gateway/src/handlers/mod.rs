pub mod health;
pub mod market;
pub mod order;
pub mod ws;

use crate::error::AppError;
use types::errors::OrderError;
use types::ids::{MarketId, OrderId, UserAddress};

fn parse_market(raw: &str) -> Result<MarketId, AppError> {
    raw.trim()
        .parse::<u64>()
        .map(MarketId::new)
        .map_err(|_| OrderError::InvalidParameters(format!("invalid market id {}", raw)).into())
}

fn parse_order_id(raw: &str) -> Result<OrderId, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| OrderError::InvalidParameters(format!("invalid order id {}", raw)).into())
}

fn parse_user(raw: &str) -> Result<UserAddress, AppError> {
    UserAddress::try_new(raw)
        .ok_or_else(|| OrderError::InsufficientSpecification("user address".to_string()).into())
}
