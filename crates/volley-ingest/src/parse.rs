//! Row validation and order construction.
//!
//! Turns one raw sheet row into zero or more orders: type checks, schedule
//! assembly in the market offset, the AMO stamp, and lot splitting.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use volley_core::{MarketClock, Order, OrderId, OrderSide, OrderType, DEFAULT_EXCHANGE};

use crate::source::RawRow;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%d-%B-%Y", "%Y/%m/%d", "%d/%m/%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M %p"];

/// Why a row produced no orders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowReject {
    /// Header or spacer row; not worth a warning.
    #[error("header row")]
    Header,
    #[error("empty price")]
    EmptyPrice,
    #[error("unparseable price: {0}")]
    BadPrice(String),
    #[error("empty symbol")]
    MissingSymbol,
    #[error("unparseable date: {0}")]
    BadDate(String),
    #[error("unparseable time: {0}")]
    BadTime(String),
    #[error("non-positive quantity: {0}")]
    BadQuantity(String),
    /// Scheduled before `now`; routine on every refresh of an old sheet.
    #[error("scheduled in the past: {0}")]
    Past(DateTime<Utc>),
}

impl RowReject {
    /// Rows rejected for these reasons are expected churn, not data
    /// problems, and log below warning level.
    pub fn is_routine(&self) -> bool {
        matches!(self, Self::Header | Self::EmptyPrice | Self::Past(_))
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
}

/// Split total quantity `q` across `lots`, front-loading the remainder so
/// the parts sum exactly to `q` and differ by at most one.
fn split_quantity(q: u32, lots: u32) -> Vec<u32> {
    // More lots than units would mint zero-quantity orders.
    let lots = lots.clamp(1, q);
    let base = q / lots;
    let remainder = q % lots;
    (0..lots)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Validate one row and expand it into its lot orders.
///
/// `now` is the rejection threshold for past schedules; `clock` stamps the
/// AMO flag from the scheduled instant.
pub fn parse_row(
    row: &RawRow,
    side: OrderSide,
    clock: &MarketClock,
    now: DateTime<Utc>,
) -> Result<Vec<Order>, RowReject> {
    if row.price.is_empty() {
        return Err(RowReject::EmptyPrice);
    }
    if row.price.to_lowercase().contains("price") {
        return Err(RowReject::Header);
    }
    let price: Decimal = row
        .price
        .parse()
        .map_err(|_| RowReject::BadPrice(row.price.clone()))?;
    if price < Decimal::ZERO {
        return Err(RowReject::BadPrice(row.price.clone()));
    }

    if row.symbol.is_empty() {
        return Err(RowReject::MissingSymbol);
    }

    let date = parse_date(&row.execute_date)
        .ok_or_else(|| RowReject::BadDate(row.execute_date.clone()))?;
    let time = parse_time(&row.execute_time)
        .ok_or_else(|| RowReject::BadTime(row.execute_time.clone()))?;

    // Sheet times are written in the market timezone; the resulting UTC
    // instant is what flows through the rest of the system.
    let scheduled_at = clock
        .offset()
        .from_local_datetime(&date.and_time(time))
        .single()
        .expect("fixed offset has no ambiguous instants")
        .with_timezone(&Utc);

    if scheduled_at <= now {
        return Err(RowReject::Past(scheduled_at));
    }

    let total: u32 = row
        .total_quantity
        .parse()
        .map_err(|_| RowReject::BadQuantity(row.total_quantity.clone()))?;
    if total == 0 {
        return Err(RowReject::BadQuantity(row.total_quantity.clone()));
    }

    // A malformed lot count defaults to a single lot.
    let lots: u32 = row.lots.parse().ok().filter(|&n| n > 0).unwrap_or(1);

    let order_type = if price > Decimal::ZERO {
        OrderType::Limit
    } else {
        OrderType::Market
    };
    let parent_id = OrderId::from_schedule(&row.symbol, scheduled_at);
    let is_amo = clock.is_amo(scheduled_at);
    let quantities = split_quantity(total, lots);
    let split = quantities.len() > 1;

    Ok(quantities
        .into_iter()
        .enumerate()
        .map(|(i, quantity)| Order {
            id: if split {
                parent_id.with_lot(i)
            } else {
                parent_id.clone()
            },
            symbol: row.symbol.to_uppercase(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            side,
            order_type,
            price,
            quantity,
            scheduled_at,
            created_at: now,
            is_amo,
        })
        .collect())
}
