//! Feed Frame Codec
//!
//! Encodes subscription requests and decodes `{"channel": ..., "data": ...}`
//! frames from the Hyperliquid public WebSocket feed into [`MarketEvent`]s.
//!
//! | Channel | Event |
//! |---------|-------|
//! | `trades` | [`MarketEvent::Trade`], one per element |
//! | `activeAssetCtx` | [`MarketEvent::Funding`] |
//! | `liquidations` | [`MarketEvent::Liquidation`], one per element |
//!
//! Control channels (`subscriptionResponse`, `pong`) and unknown channels
//! decode to no events.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::FeedError;
use crate::domain::event::{
    Asset, FundingEvent, LiquidationEvent, MarketEvent, Side, TradeEvent,
};

/// Keep-alive request expected by the feed.
pub const PING: &str = r#"{"method":"ping"}"#;

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    method: &'static str,
    subscription: Subscription<'a>,
}

#[derive(Debug, Serialize)]
struct Subscription<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    coin: Option<&'a str>,
}

/// Subscribe requests for `trades` and `activeAssetCtx` per asset, plus the
/// global `liquidations` stream.
///
/// # Errors
///
/// Returns `FeedError::Decode` if a request cannot be serialized.
pub fn subscription_requests(assets: &[Asset]) -> Result<Vec<String>, FeedError> {
    let per_asset = assets.iter().flat_map(|asset| {
        ["trades", "activeAssetCtx"].map(|kind| Subscription {
            kind,
            coin: Some(asset.as_str()),
        })
    });
    let global = std::iter::once(Subscription {
        kind: "liquidations",
        coin: None,
    });

    per_asset
        .chain(global)
        .map(|subscription| {
            serde_json::to_string(&SubscribeRequest {
                method: "subscribe",
                subscription,
            })
            .map_err(|e| FeedError::Decode(format!("invalid subscribe request: {e}")))
        })
        .collect()
}

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Deserialize)]
struct Frame {
    channel: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    coin: String,
    side: String,
    px: Decimal,
    sz: Decimal,
    time: i64,
    #[serde(default)]
    tid: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawAssetCtx {
    coin: String,
    ctx: RawCtx,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCtx {
    funding: Decimal,
    #[serde(default)]
    mark_px: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawLiquidation {
    coin: String,
    side: String,
    px: Decimal,
    sz: Decimal,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    user: Option<String>,
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns `FeedError::Decode` for malformed JSON or a malformed payload on
/// a known channel.
pub fn decode_frame(text: &str) -> Result<Vec<MarketEvent>, FeedError> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| FeedError::Decode(format!("invalid JSON: {e}")))?;

    match frame.channel.as_str() {
        "trades" => {
            let trades: Vec<RawTrade> = one_or_many(frame.data)
                .map_err(|e| FeedError::Decode(format!("invalid trade: {e}")))?;
            trades.into_iter().map(trade_event).collect()
        }
        "activeAssetCtx" => {
            let ctx: RawAssetCtx = serde_json::from_value(frame.data)
                .map_err(|e| FeedError::Decode(format!("invalid asset context: {e}")))?;
            Ok(vec![MarketEvent::Funding(FundingEvent {
                timestamp: Utc::now(),
                asset: Asset::new(ctx.coin),
                rate: ctx.ctx.funding,
                mark_price: ctx.ctx.mark_px,
            })])
        }
        "liquidations" => {
            let liquidations: Vec<RawLiquidation> = one_or_many(frame.data)
                .map_err(|e| FeedError::Decode(format!("invalid liquidation: {e}")))?;
            liquidations.into_iter().map(liquidation_event).collect()
        }
        other => {
            tracing::trace!(channel = other, "Ignoring feed channel");
            Ok(Vec::new())
        }
    }
}

fn one_or_many<T: serde::de::DeserializeOwned>(data: Value) -> serde_json::Result<Vec<T>> {
    if data.is_array() {
        serde_json::from_value(data)
    } else {
        serde_json::from_value(data).map(|item| vec![item])
    }
}

fn trade_event(raw: RawTrade) -> Result<MarketEvent, FeedError> {
    Ok(MarketEvent::Trade(TradeEvent {
        timestamp: timestamp(raw.time)?,
        asset: Asset::new(raw.coin),
        price: raw.px,
        size: raw.sz,
        side: side(&raw.side)?,
        trade_id: raw.tid,
    }))
}

fn liquidation_event(raw: RawLiquidation) -> Result<MarketEvent, FeedError> {
    Ok(MarketEvent::Liquidation(LiquidationEvent {
        timestamp: raw.time.map_or_else(|| Ok(Utc::now()), timestamp)?,
        asset: Asset::new(raw.coin),
        price: raw.px,
        size: raw.sz,
        side: side(&raw.side)?,
        account: raw.user,
    }))
}

/// Hyperliquid marks the aggressor as `B` (bid, buy) or `A` (ask, sell).
fn side(raw: &str) -> Result<Side, FeedError> {
    match raw {
        "B" | "b" | "buy" | "Buy" => Ok(Side::Buy),
        "A" | "a" | "sell" | "Sell" => Ok(Side::Sell),
        other => Err(FeedError::Decode(format!("unknown side: {other}"))),
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| FeedError::Decode(format!("invalid timestamp: {millis}")))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::event::EventCategory;

    #[test]
    fn subscribes_per_asset_plus_liquidations() {
        let requests = subscription_requests(&[Asset::new("btc"), Asset::new("ETH")]).unwrap();

        assert_eq!(requests.len(), 5);
        assert_eq!(
            requests[0],
            r#"{"method":"subscribe","subscription":{"type":"trades","coin":"BTC"}}"#
        );
        assert_eq!(
            requests[3],
            r#"{"method":"subscribe","subscription":{"type":"activeAssetCtx","coin":"ETH"}}"#
        );
        assert_eq!(
            requests[4],
            r#"{"method":"subscribe","subscription":{"type":"liquidations"}}"#
        );
    }

    #[test]
    fn decodes_trade_batch() {
        let frame = r#"{"channel":"trades","data":[
            {"coin":"BTC","side":"B","px":"50000.5","sz":"0.1","time":1700000000000,"hash":"0x1","tid":7},
            {"coin":"BTC","side":"A","px":"49999","sz":"2","time":1700000000001,"hash":"0x2","tid":8}
        ]}"#;

        let events = decode_frame(frame).unwrap();

        assert_eq!(events.len(), 2);
        let MarketEvent::Trade(trade) = &events[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.asset.as_str(), "BTC");
        assert_eq!(trade.price, Decimal::new(500_005, 1));
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.trade_id, Some(7));
        assert_eq!(trade.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn decodes_asset_context_as_funding() {
        let frame = r#"{"channel":"activeAssetCtx","data":{"coin":"ETH","ctx":{"funding":"0.0012","markPx":"3000.1","openInterest":"10"}}}"#;

        let events = decode_frame(frame).unwrap();

        assert_eq!(events.len(), 1);
        let MarketEvent::Funding(funding) = &events[0] else {
            panic!("expected funding");
        };
        assert_eq!(funding.rate, Decimal::new(12, 4));
        assert_eq!(funding.mark_price, Some(Decimal::new(30_001, 1)));
    }

    #[test]
    fn decodes_single_liquidation() {
        let frame = r#"{"channel":"liquidations","data":{"coin":"SOL","side":"A","px":"100","sz":"1500","time":1700000000000,"user":"0xabc"}}"#;

        let events = decode_frame(frame).unwrap();

        assert_eq!(events[0].category(), EventCategory::Liquidation);
        assert_eq!(events[0].asset().as_str(), "SOL");
    }

    #[test_case(r#"{"channel":"pong"}"# ; "pong")]
    #[test_case(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"# ; "subscription ack")]
    #[test_case(r#"{"channel":"l2Book","data":{}}"# ; "unknown channel")]
    fn control_frames_yield_nothing(frame: &str) {
        assert!(decode_frame(frame).unwrap().is_empty());
    }

    #[test_case("not json" ; "invalid json")]
    #[test_case(r#"{"channel":"trades","data":[{"coin":"BTC"}]}"# ; "missing fields")]
    #[test_case(r#"{"channel":"trades","data":[{"coin":"BTC","side":"X","px":"1","sz":"1","time":1}]}"# ; "unknown side")]
    fn malformed_frames_are_decode_errors(frame: &str) {
        assert!(matches!(decode_frame(frame), Err(FeedError::Decode(_))));
    }
}
