//! Market-hours classification.
//!
//! Pure functions over an instant and configured market hours. Used by the
//! ingester to stamp the AMO flag and by operators' log lines; the dispatch
//! path itself never inspects the clock.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Phase of the trading day for a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketPhase {
    /// Within regular hours on a trading day.
    Open,
    /// Before the open on a trading day.
    ClosedPre,
    /// After the close on a trading day.
    ClosedPost,
    /// Saturday or Sunday.
    Weekend,
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::ClosedPre => write!(f, "closed-pre"),
            Self::ClosedPost => write!(f, "closed-post"),
            Self::Weekend => write!(f, "weekend"),
        }
    }
}

/// Classifies instants against configured market hours.
///
/// The market timezone is a fixed UTC offset; the target venue observes no
/// daylight saving. Hours are interpreted as a half-open `[open, close)`
/// window, Monday through Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketClock {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketClock {
    /// Build a clock, validating that open precedes close.
    pub fn new(offset: FixedOffset, open: NaiveTime, close: NaiveTime) -> Result<Self> {
        if open >= close {
            return Err(CoreError::InvalidMarketHours(format!(
                "open {open} must precede close {close}"
            )));
        }
        Ok(Self {
            offset,
            open,
            close,
        })
    }

    /// The production default: 09:00–15:30 at UTC+05:30.
    pub fn standard() -> Self {
        Self {
            offset: parse_offset("IST").expect("static offset"),
            open: NaiveTime::from_hms_opt(9, 0, 0).expect("static time"),
            close: NaiveTime::from_hms_opt(15, 30, 0).expect("static time"),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Classify an instant into a market phase.
    pub fn classify(&self, instant: DateTime<Utc>) -> MarketPhase {
        let local = instant.with_timezone(&self.offset);
        match local.weekday() {
            Weekday::Sat | Weekday::Sun => MarketPhase::Weekend,
            _ => {
                let time = local.time();
                if time < self.open {
                    MarketPhase::ClosedPre
                } else if time < self.close {
                    MarketPhase::Open
                } else {
                    MarketPhase::ClosedPost
                }
            }
        }
    }

    /// The AMO rule: anything outside regular hours routes to the
    /// after-market channel.
    pub fn is_amo(&self, instant: DateTime<Utc>) -> bool {
        self.classify(instant) != MarketPhase::Open
    }

    /// Next instant at which the market is open, skipping weekends.
    ///
    /// Returns `instant` itself when the market is already open. Intended
    /// for human-readable log lines only.
    pub fn next_open(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        if self.classify(instant) == MarketPhase::Open {
            return instant;
        }
        let local = instant.with_timezone(&self.offset);
        let mut day = local.date_naive();
        // Same-day open is still ahead only in the pre-open phase.
        if local.time() >= self.open {
            day = day.succ_opt().expect("date within chrono range");
        }
        while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day = day.succ_opt().expect("date within chrono range");
        }
        self.offset
            .from_local_datetime(&day.and_time(self.open))
            .single()
            .expect("fixed offset has no ambiguous instants")
            .with_timezone(&Utc)
    }
}

/// Parse a market timezone string into a fixed offset.
///
/// Accepts the aliases `IST` and `UTC`, and `+HH:MM` / `-HH:MM` strings.
pub fn parse_offset(s: &str) -> Result<FixedOffset> {
    let normalized = s.trim();
    let canonical = match normalized.to_ascii_uppercase().as_str() {
        "IST" | "ASIA/KOLKATA" => "+05:30",
        "UTC" => "+00:00",
        _ => normalized,
    };

    let bad = || CoreError::InvalidTimezone(s.to_string());
    let (sign, rest) = match canonical.as_bytes().first() {
        Some(b'+') => (1i32, &canonical[1..]),
        Some(b'-') => (-1i32, &canonical[1..]),
        _ => return Err(bad()),
    };
    let (hh, mm) = rest.split_once(':').ok_or_else(bad)?;
    let hours: i32 = hh.parse().map_err(|_| bad())?;
    let minutes: i32 = mm.parse().map_err(|_| bad())?;
    if hours > 14 || minutes > 59 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

/// Parse a `HH:MM` market-hours boundary.
pub fn parse_market_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| CoreError::InvalidMarketHours(s.to_string()))
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::standard()
    }
}
