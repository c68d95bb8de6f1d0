//! Order types and identifiers.
//!
//! Provides the order model shared by the ingester, the store, and the
//! dispatcher, plus the execution outcome emitted after a dispatch attempt.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Default venue when a row does not name one.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Execute at the prevailing price.
    Market,
    /// Execute at `price` or better. Requires a positive price.
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// Order identifier, deterministic from symbol and scheduled instant.
///
/// Re-ingesting the same spreadsheet row yields the same id, which makes
/// store inserts idempotent. Lot splits append a `#index` suffix so each
/// lot keeps its own identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    /// Build the canonical id for a (symbol, scheduled instant) pair.
    ///
    /// Format: `SYMBOL:2025-03-10T04:00:00Z`
    pub fn from_schedule(symbol: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}:{}",
            symbol.to_uppercase(),
            scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ))
    }

    /// Derive the id of lot `index` (zero-based) of this order.
    pub fn with_lot(&self, index: usize) -> Self {
        Self(format!("{}#{index}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A scheduled order, the unit of work flowing through the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub exchange: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Non-negative; positive when `order_type` is `Limit`.
    pub price: Decimal,
    pub quantity: u32,
    /// Instant at which the order becomes eligible for dispatch.
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Stamped at ingestion from the market clock; true routes the order to
    /// the broker's after-market channel.
    pub is_amo: bool,
}

impl Order {
    /// Check the structural invariants every stored order must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidOrder("empty symbol".into()));
        }
        if self.quantity == 0 {
            return Err(CoreError::InvalidOrder(format!(
                "{}: quantity must be at least 1",
                self.id
            )));
        }
        if self.price < Decimal::ZERO {
            return Err(CoreError::InvalidOrder(format!(
                "{}: negative price {}",
                self.id, self.price
            )));
        }
        if self.order_type == OrderType::Limit && self.price <= Decimal::ZERO {
            return Err(CoreError::InvalidOrder(format!(
                "{}: limit order requires a positive price",
                self.id
            )));
        }
        Ok(())
    }
}

/// Store entry wrapping an order with its lifecycle bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    /// Past this instant the record is dropped without dispatch.
    pub expires_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

/// Timing profile of one dispatch attempt, logged in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchProfile {
    /// Time between the scheduled instant and the start of the attempt.
    pub scheduler_delay_ms: i64,
    /// Wall time spent inside the broker call.
    pub broker_call_ms: i64,
    /// Total wall time of the attempt, gate wait included.
    pub total_ms: i64,
}

impl DispatchProfile {
    pub fn zero() -> Self {
        Self {
            scheduler_delay_ms: 0,
            broker_call_ms: 0,
            total_ms: 0,
        }
    }
}

/// Terminal result of one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub order_id: OrderId,
    pub success: bool,
    /// Broker-assigned reference on success.
    pub broker_ref: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub profile: DispatchProfile,
}

impl ExecutionOutcome {
    pub fn success(order_id: OrderId, broker_ref: String, profile: DispatchProfile) -> Self {
        Self {
            order_id,
            success: true,
            broker_ref: Some(broker_ref),
            executed_at: Utc::now(),
            error_kind: None,
            error_detail: None,
            profile,
        }
    }

    pub fn failure(
        order_id: OrderId,
        kind: impl Into<String>,
        detail: impl Into<String>,
        profile: DispatchProfile,
    ) -> Self {
        Self {
            order_id,
            success: false,
            broker_ref: None,
            executed_at: Utc::now(),
            error_kind: Some(kind.into()),
            error_detail: Some(detail.into()),
            profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        let scheduled = Utc.with_ymd_and_hms(2025, 3, 10, 4, 0, 0).unwrap();
        Order {
            id: OrderId::from_schedule("RELIANCE", scheduled),
            symbol: "RELIANCE".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(2850.50),
            quantity: 5,
            scheduled_at: scheduled,
            created_at: Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap(),
            is_amo: false,
        }
    }

    #[test]
    fn id_is_deterministic() {
        let scheduled = Utc.with_ymd_and_hms(2025, 3, 10, 4, 0, 0).unwrap();
        let a = OrderId::from_schedule("reliance", scheduled);
        let b = OrderId::from_schedule("RELIANCE", scheduled);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "RELIANCE:2025-03-10T04:00:00Z");
    }

    #[test]
    fn lot_ids_are_distinct() {
        let id = OrderId::from_schedule("TCS", Utc::now());
        assert_ne!(id.with_lot(0), id.with_lot(1));
        assert!(id.with_lot(2).as_str().ends_with("#2"));
    }

    #[test]
    fn valid_order_passes() {
        assert!(sample_order().validate().is_ok());
    }

    #[test]
    fn zero_quantity_rejected() {
        let mut order = sample_order();
        order.quantity = 0;
        assert!(order.validate().is_err());
    }

    #[test]
    fn limit_requires_positive_price() {
        let mut order = sample_order();
        order.price = Decimal::ZERO;
        assert!(order.validate().is_err());

        order.order_type = OrderType::Market;
        assert!(order.validate().is_ok());
    }

    #[test]
    fn negative_price_rejected() {
        let mut order = sample_order();
        order.order_type = OrderType::Market;
        order.price = dec!(-1);
        assert!(order.validate().is_err());
    }

    #[test]
    fn record_round_trips_through_json() {
        let order = sample_order();
        let record = OrderRecord {
            expires_at: order.scheduled_at + chrono::Duration::seconds(10),
            inserted_at: order.created_at,
            order,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: OrderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
