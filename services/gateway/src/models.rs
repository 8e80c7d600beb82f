use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::errors::OrderError;
use types::freeze::{FreezeQuote, FreezeTransactionPayload};
use types::ids::{MarketId, OrderId, UserAddress};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderFlags, OrderIntent, OrderKind, OrderStatus, Side, TimeInForce};
use types::trade::Trade;

use crate::history::{OrderQuery, TradeQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OrderTypeField {
    Market,
    Limit,
}

/// Order body of `/orders`, `/orders/freeze` and `/orders/confirm`
///
/// Fields are loose here and checked in [`OrderRequest::into_intent`], so a
/// bad value gets a reason code instead of a deserializer message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub market_id: Option<u64>,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub order_type: Option<OrderTypeField>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub post_only: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn missing(field: &str) -> OrderError {
    OrderError::InsufficientSpecification(field.to_string())
}

impl OrderRequest {
    pub fn into_intent(self) -> Result<OrderIntent, OrderError> {
        let user_address = self
            .user_address
            .as_deref()
            .and_then(UserAddress::try_new)
            .ok_or_else(|| missing("user_address"))?;
        let market_id = MarketId::new(self.market_id.ok_or_else(|| missing("market_id"))?);
        let side = self.side.ok_or_else(|| missing("side"))?;
        let order_type = self.order_type.ok_or_else(|| missing("order_type"))?;
        let size = self.size.as_deref().ok_or_else(|| missing("size"))?;
        let size = Quantity::from_str(size.trim())
            .map_err(|e| OrderError::InvalidParameters(format!("size: {}", e)))?;

        let kind = match (order_type, self.price.as_deref()) {
            (OrderTypeField::Limit, Some(price)) => OrderKind::Limit {
                price: Price::from_str(price.trim())
                    .map_err(|e| OrderError::InvalidParameters(format!("price: {}", e)))?,
            },
            (OrderTypeField::Limit, None) => return Err(missing("price")),
            (OrderTypeField::Market, Some(_)) => {
                return Err(OrderError::InvalidParameters(
                    "market orders do not take a price".to_string(),
                ))
            }
            (OrderTypeField::Market, None) => OrderKind::Market,
        };

        let time_in_force = self.time_in_force.unwrap_or(match kind {
            OrderKind::Market => TimeInForce::IOC,
            OrderKind::Limit { .. } => TimeInForce::GTC,
        });
        if self.post_only && kind.is_market() {
            return Err(OrderError::InvalidParameters(
                "post_only requires a limit order".to_string(),
            ));
        }

        Ok(OrderIntent {
            user_address,
            market_id,
            side,
            kind,
            size,
            time_in_force,
            flags: OrderFlags {
                reduce_only: self.reduce_only,
                post_only: self.post_only,
            },
            expires_at: self.expires_at,
        })
    }
}

/// Body of `/orders/confirm`; the original order fields are accepted and
/// ignored since the quote already holds the intent
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmRequest {
    pub order_id: OrderId,
    pub signed_transaction_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreezeResponse {
    pub order_id: OrderId,
    pub freeze_transaction_payload: FreezeTransactionPayload,
    pub required_collateral: u64,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

impl From<FreezeQuote> for FreezeResponse {
    fn from(quote: FreezeQuote) -> Self {
        Self {
            order_id: quote.order_id,
            freeze_transaction_payload: quote.payload,
            required_collateral: quote.required_collateral,
            message: quote.message,
            expires_at: quote.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub order: Order,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserOrdersParams {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<UserOrdersParams> for OrderQuery {
    fn from(params: UserOrdersParams) -> Self {
        Self {
            status: params.status,
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        }
    }
}

/// Times are RFC 3339 strings; a malformed one is a bad request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserTradesParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TryFrom<UserTradesParams> for TradeQuery {
    type Error = OrderError;

    fn try_from(params: UserTradesParams) -> Result<Self, Self::Error> {
        let parse = |name: &str, raw: Option<String>| -> Result<Option<DateTime<Utc>>, OrderError> {
            raw.map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| OrderError::InvalidParameters(format!("{}: {}", name, e)))
            })
            .transpose()
        };
        Ok(Self {
            start_time: parse("start_time", params.start_time)?,
            end_time: parse("end_time", params.end_time)?,
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradesParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookParams {
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrdersPage {
    pub orders: Vec<Order>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradesPage {
    pub trades: Vec<Trade>,
    pub total: usize,
}
