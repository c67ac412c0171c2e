//! Market Event Types
//!
//! Canonical, codec-agnostic representation of the events produced by a
//! feed monitor. Every event is consumed exactly once by the event processor
//! and never persisted.

mod dedup;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use dedup::DuplicateWindow;

// =============================================================================
// Asset
// =============================================================================

/// Asset identifier (e.g. `BTC`), normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    /// Create a new asset identifier.
    #[must_use]
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Asset {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

// =============================================================================
// Event Category
// =============================================================================

/// Fieldless discriminant of [`MarketEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Executed trade.
    Trade,
    /// Forced position liquidation.
    Liquidation,
    /// Funding rate update.
    Funding,
    /// Unusually large resting or executed order.
    LargeOrder,
    /// Price level crossing reported by the feed.
    PriceAlert,
}

impl EventCategory {
    /// All categories in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Trade,
        Self::Liquidation,
        Self::Funding,
        Self::LargeOrder,
        Self::PriceAlert,
    ];

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Liquidation => "liquidation",
            Self::Funding => "funding",
            Self::LargeOrder => "large_order",
            Self::PriceAlert => "price_alert",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event Payloads
// =============================================================================

/// Aggressor side of a trade or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side.
    Buy,
    /// Sell side.
    Sell,
}

impl Side {
    /// Get the side name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Traded asset.
    pub asset: Asset,
    /// Execution price.
    pub price: Decimal,
    /// Executed size in base units.
    pub size: Decimal,
    /// Aggressor side.
    pub side: Side,
    /// Exchange trade ID, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<u64>,
}

/// Forced liquidation of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Liquidated asset.
    pub asset: Asset,
    /// Liquidation price.
    pub price: Decimal,
    /// Liquidated size in base units.
    pub size: Decimal,
    /// Side of the liquidated position.
    pub side: Side,
    /// Liquidated account, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Funding rate update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingEvent {
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Perpetual asset.
    pub asset: Asset,
    /// Funding rate per interval (0.0001 = 0.01%).
    pub rate: Decimal,
    /// Mark price at the time of the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
}

/// Unusually large order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeOrderEvent {
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Asset of the order.
    pub asset: Asset,
    /// Limit price.
    pub price: Decimal,
    /// Order size in base units.
    pub size: Decimal,
    /// Order side.
    pub side: Side,
}

/// Price level crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAlertEvent {
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Asset whose price moved.
    pub asset: Asset,
    /// Current price.
    pub price: Decimal,
    /// Price the alert was measured against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Decimal>,
}

// =============================================================================
// Market Event
// =============================================================================

/// A typed event emitted by the feed monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum MarketEvent {
    /// Executed trade.
    Trade(TradeEvent),
    /// Forced liquidation.
    Liquidation(LiquidationEvent),
    /// Funding rate update.
    Funding(FundingEvent),
    /// Large order.
    LargeOrder(LargeOrderEvent),
    /// Price alert.
    PriceAlert(PriceAlertEvent),
}

impl MarketEvent {
    /// Category of this event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Trade(_) => EventCategory::Trade,
            Self::Liquidation(_) => EventCategory::Liquidation,
            Self::Funding(_) => EventCategory::Funding,
            Self::LargeOrder(_) => EventCategory::LargeOrder,
            Self::PriceAlert(_) => EventCategory::PriceAlert,
        }
    }

    /// Subject asset.
    #[must_use]
    pub const fn asset(&self) -> &Asset {
        match self {
            Self::Trade(e) => &e.asset,
            Self::Liquidation(e) => &e.asset,
            Self::Funding(e) => &e.asset,
            Self::LargeOrder(e) => &e.asset,
            Self::PriceAlert(e) => &e.asset,
        }
    }

    /// Exchange timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(e) => e.timestamp,
            Self::Liquidation(e) => e.timestamp,
            Self::Funding(e) => e.timestamp,
            Self::LargeOrder(e) => e.timestamp,
            Self::PriceAlert(e) => e.timestamp,
        }
    }

    /// Stable identity of the event used to detect redelivery after a feed
    /// reconnect. Two events with equal fingerprints describe the same fact.
    ///
    /// Funding snapshots carry no exchange time, so they are identified by
    /// their values alone.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let detail = match self {
            Self::Trade(e) => e.trade_id.map_or_else(
                || format!("{}:{}:{}", e.price, e.size, e.side.as_str()),
                |tid| tid.to_string(),
            ),
            Self::Liquidation(e) => format!("{}:{}:{}", e.price, e.size, e.side.as_str()),
            Self::Funding(e) => {
                let mark = e.mark_price.map(|p| p.normalize().to_string()).unwrap_or_default();
                return format!(
                    "{}|{}|{}:{mark}",
                    self.category(),
                    self.asset(),
                    e.rate.normalize()
                );
            }
            Self::LargeOrder(e) => format!("{}:{}:{}", e.price, e.size, e.side.as_str()),
            Self::PriceAlert(e) => e.price.to_string(),
        };
        let millis = self.timestamp().timestamp_millis();
        format!("{}|{}|{millis}|{detail}", self.category(), self.asset())
    }
}

impl From<TradeEvent> for MarketEvent {
    fn from(event: TradeEvent) -> Self {
        Self::Trade(event)
    }
}

impl From<LiquidationEvent> for MarketEvent {
    fn from(event: LiquidationEvent) -> Self {
        Self::Liquidation(event)
    }
}

impl From<FundingEvent> for MarketEvent {
    fn from(event: FundingEvent) -> Self {
        Self::Funding(event)
    }
}

impl From<LargeOrderEvent> for MarketEvent {
    fn from(event: LargeOrderEvent) -> Self {
        Self::LargeOrder(event)
    }
}

impl From<PriceAlertEvent> for MarketEvent {
    fn from(event: PriceAlertEvent) -> Self {
        Self::PriceAlert(event)
    }
}

// =============================================================================
// Tests
// =============================================================================
