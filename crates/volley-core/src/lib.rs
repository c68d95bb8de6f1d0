//! Core domain types for the volley scheduled trade dispatcher.
//!
//! This crate provides the types shared across the pipeline:
//! - `Order`, `OrderRecord`: the unit of work and its store entry
//! - `OrderId`: deterministic identity, stable across re-ingestion
//! - `ExecutionOutcome`, `DispatchProfile`: what a dispatch attempt reports
//! - `MarketClock`, `MarketPhase`: market-hours classification and the AMO rule

pub mod clock;
pub mod error;
pub mod order;

pub use clock::{parse_market_time, parse_offset, MarketClock, MarketPhase};
pub use error::{CoreError, Result};
pub use order::{
    DispatchProfile, ExecutionOutcome, Order, OrderId, OrderRecord, OrderSide, OrderType,
    DEFAULT_EXCHANGE,
};
