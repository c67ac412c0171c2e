//! Event Processor
//!
//! Turns one market event into zero or more notifications by running it
//! through the rule evaluator. Redelivered events are suppressed by
//! fingerprint, and evaluator failures (panics included) are contained: the
//! event yields no notifications and one evaluation error is recorded.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{MetricsRegistry, PlatformSignal};
use crate::application::ports::{EvaluationError, RuleEvaluator};
use crate::domain::event::{
    DuplicateWindow, FundingEvent, LargeOrderEvent, LiquidationEvent, MarketEvent,
    PriceAlertEvent, TradeEvent,
};
use crate::domain::notification::{Notification, NotificationCandidate};
use crate::error::PipelineError;

/// Default number of recent event fingerprints kept for redelivery checks.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Rule evaluation stage of the pipeline.
pub struct EventProcessor {
    evaluator: Arc<dyn RuleEvaluator>,
    metrics: Arc<MetricsRegistry>,
    recent: Mutex<DuplicateWindow>,
    signals: Option<broadcast::Sender<PlatformSignal>>,
}

impl EventProcessor {
    /// Create a processor. A `dedup_window` of 0 disables redelivery checks.
    #[must_use]
    pub fn new(
        evaluator: Arc<dyn RuleEvaluator>,
        metrics: Arc<MetricsRegistry>,
        dedup_window: usize,
    ) -> Self {
        Self {
            evaluator,
            metrics,
            recent: Mutex::new(DuplicateWindow::new(dedup_window)),
            signals: None,
        }
    }

    /// Publish a [`PlatformSignal::ProcessingError`] for each failed evaluation.
    #[must_use]
    pub fn with_signals(mut self, signals: broadcast::Sender<PlatformSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Evaluate a trade.
    pub fn process_trade(&self, event: TradeEvent) -> Vec<Notification> {
        self.process(&MarketEvent::Trade(event))
    }

    /// Evaluate a liquidation.
    pub fn process_liquidation(&self, event: LiquidationEvent) -> Vec<Notification> {
        self.process(&MarketEvent::Liquidation(event))
    }

    /// Evaluate a funding update.
    pub fn process_funding(&self, event: FundingEvent) -> Vec<Notification> {
        self.process(&MarketEvent::Funding(event))
    }

    /// Evaluate a large order.
    pub fn process_large_order(&self, event: LargeOrderEvent) -> Vec<Notification> {
        self.process(&MarketEvent::LargeOrder(event))
    }

    /// Evaluate a price alert.
    pub fn process_price_alert(&self, event: PriceAlertEvent) -> Vec<Notification> {
        self.process(&MarketEvent::PriceAlert(event))
    }

    /// Evaluate any event.
    ///
    /// Never fails: a redelivered event or an evaluator failure yields an
    /// empty list.
    pub fn process(&self, event: &MarketEvent) -> Vec<Notification> {
        let category = event.category();
        self.metrics.record_event_received(category);

        if !self.recent.lock().insert(event.fingerprint()) {
            tracing::debug!(
                category = %category,
                asset = %event.asset(),
                "Skipping redelivered event"
            );
            self.metrics.record_duplicate(category);
            return Vec::new();
        }

        match self.evaluate(event) {
            Ok(candidates) => {
                let notifications: Vec<Notification> = candidates
                    .into_iter()
                    .map(|candidate| Notification::from_candidate(candidate, event))
                    .collect();
                if !notifications.is_empty() {
                    tracing::debug!(
                        category = %category,
                        asset = %event.asset(),
                        count = notifications.len(),
                        "Event matched rules"
                    );
                }
                notifications
            }
            Err(source) => {
                tracing::warn!(
                    category = %category,
                    asset = %event.asset(),
                    error = %source,
                    "Rule evaluation failed"
                );
                let error = PipelineError::Evaluation { category, source };
                self.metrics.record_error(&error);
                if let Some(signals) = &self.signals {
                    let _ = signals.send(PlatformSignal::ProcessingError {
                        category,
                        reason: error.to_string(),
                    });
                }
                Vec::new()
            }
        }
    }

    fn evaluate(&self, event: &MarketEvent) -> Result<Vec<NotificationCandidate>, EvaluationError> {
        catch_unwind(AssertUnwindSafe(|| self.evaluator.evaluate(event)))
            .unwrap_or_else(|panic| Err(EvaluationError::Panicked(panic_message(&*panic))))
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("recent", &self.recent.lock().len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "evaluator panicked".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockRuleEvaluator;
    use crate::domain::event::{Asset, EventCategory, Side};
    use crate::domain::notification::Severity;

    fn trade(tid: u64) -> TradeEvent {
        TradeEvent {
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            asset: Asset::new("ETH"),
            price: Decimal::from(3_000),
            size: Decimal::ONE,
            side: Side::Sell,
            trade_id: Some(tid),
        }
    }

    fn processor(evaluator: MockRuleEvaluator, window: usize) -> (EventProcessor, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::default());
        (
            EventProcessor::new(Arc::new(evaluator), Arc::clone(&metrics), window),
            metrics,
        )
    }

    #[test]
    fn candidates_become_notifications() {
        let mut evaluator = MockRuleEvaluator::new();
        evaluator.expect_evaluate().returning(|_| {
            Ok(vec![
                NotificationCandidate::new("a", Severity::Info, "ETH first"),
                NotificationCandidate::new("b", Severity::Warning, "ETH second"),
            ])
        });
        let (processor, _) = processor(evaluator, 16);

        let notifications = processor.process_trade(trade(1));

        assert_eq!(notifications.len(), 2);
        assert!(notifications.iter().all(|n| n.category() == EventCategory::Trade));
        assert_eq!(notifications[1].severity(), Severity::Warning);
    }

    #[test]
    fn evaluator_error_is_contained() {
        let mut evaluator = MockRuleEvaluator::new();
        evaluator.expect_evaluate().returning(|_| {
            Err(EvaluationError::RuleFailed {
                rule: "price_change".to_string(),
                reason: "no reference".to_string(),
            })
        });
        let (processor, metrics) = processor(evaluator, 16);
        let (tx, mut rx) = broadcast::channel(4);
        let processor = processor.with_signals(tx);

        assert!(processor.process_trade(trade(1)).is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.evaluation_errors, 1);
        assert_eq!(snapshot.errors, 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(PlatformSignal::ProcessingError { category: EventCategory::Trade, .. })
        ));
    }

    struct PanickingEvaluator;

    impl RuleEvaluator for PanickingEvaluator {
        fn evaluate(&self, _: &MarketEvent) -> Result<Vec<NotificationCandidate>, EvaluationError> {
            panic!("threshold table corrupted")
        }
    }

    #[test]
    fn evaluator_panic_is_contained() {
        let metrics = Arc::new(MetricsRegistry::default());
        let processor = EventProcessor::new(Arc::new(PanickingEvaluator), Arc::clone(&metrics), 16);

        assert!(processor.process_trade(trade(1)).is_empty());
        assert!(processor.process_trade(trade(2)).is_empty());
        assert_eq!(metrics.snapshot().evaluation_errors, 2);
    }

    #[test]
    fn redelivered_event_is_skipped() {
        let mut evaluator = MockRuleEvaluator::new();
        evaluator
            .expect_evaluate()
            .times(2)
            .returning(|_| Ok(vec![NotificationCandidate::new("a", Severity::Info, "ETH")]));
        let (processor, metrics) = processor(evaluator, 16);

        assert_eq!(processor.process_trade(trade(1)).len(), 1);
        assert!(processor.process_trade(trade(1)).is_empty());
        assert_eq!(processor.process_trade(trade(2)).len(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 3);
        assert_eq!(snapshot.duplicates_suppressed, 1);
    }

    #[test]
    fn zero_window_disables_redelivery_checks() {
        let mut evaluator = MockRuleEvaluator::new();
        evaluator.expect_evaluate().times(2).returning(|_| Ok(Vec::new()));
        let (processor, metrics) = processor(evaluator, 0);

        processor.process_trade(trade(1));
        processor.process_trade(trade(1));

        assert_eq!(metrics.snapshot().duplicates_suppressed, 0);
    }

    #[test]
    fn panic_message_extracts_payload() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(&*owned), "boom");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "evaluator panicked");
    }
}
