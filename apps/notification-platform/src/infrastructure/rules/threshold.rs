//! Threshold Rule Evaluator
//!
//! Fixed per-category threshold rules:
//!
//! | Category | Fires when | Severity |
//! |----------|------------|----------|
//! | trade | move vs last trade price > `price_change_pct` % | critical above 5x, else warning |
//! | liquidation | `price * size` ≥ `liquidation_notional` | critical above 5x, else warning |
//! | funding | `|rate|` ≥ `funding_rate_abs` | warning |
//! | large order | `price * size` ≥ `large_order_notional` | info |
//! | price alert | always | info |
//!
//! The first trade seen for an asset only seeds its reference price.

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{EvaluationError, RuleEvaluator};
use crate::domain::event::{
    Asset, FundingEvent, LargeOrderEvent, LiquidationEvent, MarketEvent, PriceAlertEvent,
    TradeEvent,
};
use crate::domain::notification::{NotificationCandidate, Severity};

const CRITICAL_MULTIPLE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Rule thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRules {
    /// Trade price move, in percent, vs the previous trade.
    pub price_change_pct: Decimal,
    /// Liquidation notional.
    pub liquidation_notional: Decimal,
    /// Absolute funding rate.
    pub funding_rate_abs: Decimal,
    /// Large order notional.
    pub large_order_notional: Decimal,
}

impl Default for ThresholdRules {
    fn default() -> Self {
        Self {
            price_change_pct: Decimal::ONE,
            liquidation_notional: Decimal::from(100_000),
            funding_rate_abs: Decimal::new(5, 4),
            large_order_notional: Decimal::from(1_000_000),
        }
    }
}

/// Rule evaluator over [`ThresholdRules`].
#[derive(Debug, Default)]
pub struct ThresholdRuleEvaluator {
    rules: ThresholdRules,
    last_trade: Mutex<HashMap<Asset, Decimal>>,
}

impl ThresholdRuleEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new(rules: ThresholdRules) -> Self {
        Self {
            rules,
            last_trade: Mutex::new(HashMap::new()),
        }
    }

    /// Configured thresholds.
    #[must_use]
    pub const fn rules(&self) -> &ThresholdRules {
        &self.rules
    }

    fn trade(&self, event: &TradeEvent) -> Result<Vec<NotificationCandidate>, EvaluationError> {
        if event.price <= Decimal::ZERO {
            return Err(EvaluationError::RuleFailed {
                rule: "price_change".to_string(),
                reason: format!("non-positive trade price {} for {}", event.price, event.asset),
            });
        }

        let Some(reference) = self
            .last_trade
            .lock()
            .insert(event.asset.clone(), event.price)
        else {
            return Ok(Vec::new());
        };

        let change_pct = event
            .price
            .checked_sub(reference)
            .and_then(|delta| delta.checked_div(reference))
            .and_then(|ratio| ratio.checked_mul(HUNDRED))
            .ok_or_else(|| EvaluationError::RuleFailed {
                rule: "price_change".to_string(),
                reason: format!(
                    "price change from {reference} to {} for {} overflows",
                    event.price, event.asset
                ),
            })?;
        if change_pct.abs() <= self.rules.price_change_pct {
            return Ok(Vec::new());
        }

        let critical = self.rules.price_change_pct.saturating_mul(CRITICAL_MULTIPLE);
        let severity = if change_pct.abs() > critical {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let direction = if change_pct.is_sign_positive() { "up" } else { "down" };

        Ok(vec![NotificationCandidate::new(
            "price_change",
            severity,
            format!(
                "{} {direction} {:.2}% to {} (from {reference})",
                event.asset,
                change_pct.abs(),
                event.price
            ),
        )])
    }

    fn liquidation(
        &self,
        event: &LiquidationEvent,
    ) -> Result<Vec<NotificationCandidate>, EvaluationError> {
        let notional = notional("liquidation_notional", &event.asset, event.price, event.size)?;
        if notional < self.rules.liquidation_notional {
            return Ok(Vec::new());
        }

        let critical = self.rules.liquidation_notional.saturating_mul(CRITICAL_MULTIPLE);
        let severity = if notional >= critical {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Ok(vec![NotificationCandidate::new(
            "liquidation_notional",
            severity,
            format!(
                "{} {} liquidation of {} at {} (notional {})",
                event.asset,
                event.side.as_str(),
                event.size,
                event.price,
                notional.round_dp(2)
            ),
        )])
    }

    fn funding(&self, event: &FundingEvent) -> Vec<NotificationCandidate> {
        if event.rate.abs() < self.rules.funding_rate_abs {
            return Vec::new();
        }

        let message = event.rate.checked_mul(HUNDRED).map_or_else(
            || format!("{} funding rate {} per hour", event.asset, event.rate),
            |percent| format!("{} funding rate {percent:.4}% per hour", event.asset),
        );
        vec![NotificationCandidate::new("funding_rate", Severity::Warning, message)]
    }

    fn large_order(
        &self,
        event: &LargeOrderEvent,
    ) -> Result<Vec<NotificationCandidate>, EvaluationError> {
        let notional = notional("large_order", &event.asset, event.price, event.size)?;
        if notional < self.rules.large_order_notional {
            return Ok(Vec::new());
        }

        Ok(vec![NotificationCandidate::new(
            "large_order",
            Severity::Info,
            format!(
                "{} large {} order of {} at {} (notional {})",
                event.asset,
                event.side.as_str(),
                event.size,
                event.price,
                notional.round_dp(2)
            ),
        )])
    }

    fn price_alert(event: &PriceAlertEvent) -> Vec<NotificationCandidate> {
        let message = event.reference_price.map_or_else(
            || format!("{} price alert at {}", event.asset, event.price),
            |reference| format!("{} crossed {reference}, now {}", event.asset, event.price),
        );
        vec![NotificationCandidate::new("price_alert", Severity::Info, message)]
    }
}

fn notional(
    rule: &str,
    asset: &Asset,
    price: Decimal,
    size: Decimal,
) -> Result<Decimal, EvaluationError> {
    price
        .checked_mul(size)
        .ok_or_else(|| EvaluationError::RuleFailed {
            rule: rule.to_string(),
            reason: format!("notional of {size} at {price} for {asset} overflows"),
        })
}

impl RuleEvaluator for ThresholdRuleEvaluator {
    fn evaluate(&self, event: &MarketEvent) -> Result<Vec<NotificationCandidate>, EvaluationError> {
        match event {
            MarketEvent::Trade(e) => self.trade(e),
            MarketEvent::Liquidation(e) => self.liquidation(e),
            MarketEvent::Funding(e) => Ok(self.funding(e)),
            MarketEvent::LargeOrder(e) => self.large_order(e),
            MarketEvent::PriceAlert(e) => Ok(Self::price_alert(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use test_case::test_case;

    use super::*;
    use crate::domain::event::Side;

    fn trade(asset: &str, price: i64) -> MarketEvent {
        MarketEvent::Trade(TradeEvent {
            timestamp: Utc::now(),
            asset: Asset::new(asset),
            price: Decimal::from(price),
            size: Decimal::ONE,
            side: Side::Buy,
            trade_id: None,
        })
    }

    #[test]
    fn first_trade_only_seeds_reference() {
        let evaluator = ThresholdRuleEvaluator::default();
        assert!(evaluator.evaluate(&trade("BTC", 49_000)).unwrap().is_empty());
    }

    #[test]
    fn btc_move_above_one_percent_fires() {
        let evaluator = ThresholdRuleEvaluator::default();
        evaluator.evaluate(&trade("BTC", 49_000)).unwrap();

        let candidates = evaluator.evaluate(&trade("BTC", 50_000)).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].severity, Severity::Warning);
        assert!(candidates[0].message.contains("BTC"));
        assert!(candidates[0].message.contains("up"));
    }

    #[test_case(100, 101, 0 ; "exactly at threshold")]
    #[test_case(100, 102, 1 ; "above threshold")]
    #[test_case(100, 98, 1 ; "downward move")]
    fn trade_threshold(from: i64, to: i64, expected: usize) {
        let evaluator = ThresholdRuleEvaluator::default();
        evaluator.evaluate(&trade("ETH", from)).unwrap();
        assert_eq!(evaluator.evaluate(&trade("ETH", to)).unwrap().len(), expected);
    }

    #[test]
    fn large_move_is_critical() {
        let evaluator = ThresholdRuleEvaluator::default();
        evaluator.evaluate(&trade("SOL", 100)).unwrap();
        let candidates = evaluator.evaluate(&trade("SOL", 110)).unwrap();
        assert_eq!(candidates[0].severity, Severity::Critical);
    }

    #[test]
    fn references_are_per_asset() {
        let evaluator = ThresholdRuleEvaluator::default();
        evaluator.evaluate(&trade("BTC", 50_000)).unwrap();
        assert!(evaluator.evaluate(&trade("ETH", 3_000)).unwrap().is_empty());
    }

    #[test]
    fn non_positive_price_is_rule_failure() {
        let evaluator = ThresholdRuleEvaluator::default();
        assert!(matches!(
            evaluator.evaluate(&trade("BTC", 0)),
            Err(EvaluationError::RuleFailed { .. })
        ));
    }

    #[test_case(1_000, 99, 0 ; "below notional")]
    #[test_case(1_000, 100, 1 ; "at notional")]
    fn liquidation_threshold(price: i64, size: i64, expected: usize) {
        let evaluator = ThresholdRuleEvaluator::default();
        let event = MarketEvent::Liquidation(LiquidationEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::from(price),
            size: Decimal::from(size),
            side: Side::Sell,
            account: None,
        });
        assert_eq!(evaluator.evaluate(&event).unwrap().len(), expected);
    }

    #[test]
    fn overflowing_values_are_rule_failures() {
        let evaluator = ThresholdRuleEvaluator::default();
        let liquidation = MarketEvent::Liquidation(LiquidationEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::MAX,
            size: Decimal::from(2),
            side: Side::Sell,
            account: None,
        });
        assert!(matches!(
            evaluator.evaluate(&liquidation),
            Err(EvaluationError::RuleFailed { ref rule, .. }) if rule == "liquidation_notional"
        ));

        let order = MarketEvent::LargeOrder(LargeOrderEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::MAX,
            size: Decimal::MAX,
            side: Side::Buy,
        });
        assert!(matches!(
            evaluator.evaluate(&order),
            Err(EvaluationError::RuleFailed { .. })
        ));

        let tiny = Decimal::new(1, 28);
        let mut seed = trade("ETH", 1);
        if let MarketEvent::Trade(t) = &mut seed {
            t.price = tiny;
        }
        evaluator.evaluate(&seed).unwrap();
        let mut huge = trade("ETH", 1);
        if let MarketEvent::Trade(t) = &mut huge {
            t.price = Decimal::MAX;
        }
        assert!(matches!(
            evaluator.evaluate(&huge),
            Err(EvaluationError::RuleFailed { ref rule, .. }) if rule == "price_change"
        ));
    }

    #[test_case(Decimal::new(4, 4), 0 ; "below rate")]
    #[test_case(Decimal::new(5, 4), 1 ; "at rate")]
    #[test_case(Decimal::new(-8, 4), 1 ; "negative rate")]
    fn funding_threshold(rate: Decimal, expected: usize) {
        let evaluator = ThresholdRuleEvaluator::default();
        let event = MarketEvent::Funding(FundingEvent {
            timestamp: Utc::now(),
            asset: Asset::new("ETH"),
            rate,
            mark_price: None,
        });
        assert_eq!(evaluator.evaluate(&event).unwrap().len(), expected);
    }

    #[test]
    fn large_order_and_price_alert() {
        let evaluator = ThresholdRuleEvaluator::default();
        let order = MarketEvent::LargeOrder(LargeOrderEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::from(50_000),
            size: Decimal::from(20),
            side: Side::Buy,
        });
        let alert = MarketEvent::PriceAlert(PriceAlertEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::from(60_000),
            reference_price: Some(Decimal::from(59_999)),
        });

        assert_eq!(evaluator.evaluate(&order).unwrap()[0].severity, Severity::Info);
        let alert = evaluator.evaluate(&alert).unwrap();
        assert_eq!(alert.len(), 1);
        assert!(alert[0].message.starts_with("BTC"));
    }
}
