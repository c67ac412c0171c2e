//! Rule Evaluator Adapters

mod threshold;

pub use threshold::{ThresholdRuleEvaluator, ThresholdRules};
