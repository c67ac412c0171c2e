//! Platform Configuration Settings
//!
//! Configuration types for the notification platform, loaded from
//! environment variables. Unset variables fall back to defaults; set but
//! unparsable variables are rejected.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{DEFAULT_EXPORT_INTERVAL, DeliveryConfig, PipelineConfig};
use crate::infrastructure::rules::ThresholdRules;

/// Hyperliquid mainnet WebSocket endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket URL.
    pub ws_url: String,
    /// Asset symbols to subscribe to.
    pub assets: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping interval.
    pub ping_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_FEED_URL.to_string(),
            assets: vec!["BTC".to_string(), "ETH".to_string()],
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
            ping_interval: Duration::from_secs(50),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Feed connection.
    pub feed: FeedSettings,
    /// Event pipeline sizing.
    pub pipeline: PipelineConfig,
    /// Delivery fan-out.
    pub delivery: DeliveryConfig,
    /// Alert thresholds.
    pub rules: ThresholdRules,
    /// HTTP server.
    pub server: ServerSettings,
    /// Metrics export interval.
    pub metrics_export_interval: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            pipeline: PipelineConfig::default(),
            delivery: DeliveryConfig::default(),
            rules: ThresholdRules::default(),
            server: ServerSettings::default(),
            metrics_export_interval: DEFAULT_EXPORT_INTERVAL,
        }
    }
}

impl PlatformConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            ws_url: env.non_empty("FEED_WS_URL")?.unwrap_or(feed_defaults.ws_url),
            assets: env.list("FEED_ASSETS")?.unwrap_or(feed_defaults.assets),
            reconnect_delay_initial: env.millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env
                .secs("FEED_RECONNECT_DELAY_MAX_SECS", feed_defaults.reconnect_delay_max)?,
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env.parse(
                "FEED_RECONNECT_MAX_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            )?,
            ping_interval: env.interval("FEED_PING_INTERVAL_SECS", feed_defaults.ping_interval)?,
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            event_queue_capacity: env.positive(
                "PIPELINE_EVENT_QUEUE_CAPACITY",
                pipeline_defaults.event_queue_capacity,
            )?,
            workers: env.positive("PIPELINE_WORKERS", pipeline_defaults.workers)?,
            dedup_window: env.parse("PIPELINE_DEDUP_WINDOW", pipeline_defaults.dedup_window)?,
            stop_timeout: env.secs("PIPELINE_STOP_TIMEOUT_SECS", pipeline_defaults.stop_timeout)?,
        };

        let delivery_defaults = DeliveryConfig::default();
        let delivery = DeliveryConfig {
            channel_queue_capacity: env.positive(
                "DELIVERY_CHANNEL_QUEUE_CAPACITY",
                delivery_defaults.channel_queue_capacity,
            )?,
            workers_per_channel: env.positive(
                "DELIVERY_WORKERS_PER_CHANNEL",
                delivery_defaults.workers_per_channel,
            )?,
            attempt_timeout: env.secs(
                "DELIVERY_ATTEMPT_TIMEOUT_SECS",
                delivery_defaults.attempt_timeout,
            )?,
            reply_timeout: env.secs("DELIVERY_REPLY_TIMEOUT_SECS", delivery_defaults.reply_timeout)?,
            shutdown_timeout: env.secs(
                "DELIVERY_SHUTDOWN_TIMEOUT_SECS",
                delivery_defaults.shutdown_timeout,
            )?,
            health_probe_interval: env.interval(
                "DELIVERY_HEALTH_PROBE_INTERVAL_SECS",
                delivery_defaults.health_probe_interval,
            )?,
        };

        let rule_defaults = ThresholdRules::default();
        let rules = ThresholdRules {
            price_change_pct: env.parse("RULE_PRICE_CHANGE_PCT", rule_defaults.price_change_pct)?,
            liquidation_notional: env.parse(
                "RULE_LIQUIDATION_NOTIONAL",
                rule_defaults.liquidation_notional,
            )?,
            funding_rate_abs: env.parse("RULE_FUNDING_RATE_ABS", rule_defaults.funding_rate_abs)?,
            large_order_notional: env.parse(
                "RULE_LARGE_ORDER_NOTIONAL",
                rule_defaults.large_order_notional,
            )?,
        };

        let server = ServerSettings {
            health_port: env.parse("NOTIFY_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        let metrics_export_interval =
            env.interval("METRICS_EXPORT_INTERVAL_SECS", DEFAULT_EXPORT_INTERVAL)?;

        Ok(Self {
            feed,
            pipeline,
            delivery,
            rules,
            server,
            metrics_export_interval,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string())
    }

    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.raw(key) {
            Some(v) if v.is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            other => Ok(other),
        }
    }

    fn list(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(None);
        };
        let items: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .collect();
        if items.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(Some(items))
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse(key, default)?;
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    /// Like [`secs`](Self::secs) but rejects zero, which tokio intervals
    /// cannot use.
    fn interval(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let value = self.secs(key, default)?;
        if value.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(value)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;
    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PlatformConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PlatformConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.feed.ws_url, DEFAULT_FEED_URL);
        assert_eq!(config.feed.assets, vec!["BTC", "ETH"]);
        assert_eq!(config.pipeline.event_queue_capacity, 10_000);
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.delivery.channel_queue_capacity, 1024);
        assert_eq!(config.delivery.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.delivery.reply_timeout, Duration::from_secs(15));
        assert_eq!(config.rules.price_change_pct, Decimal::ONE);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.metrics_export_interval, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("FEED_ASSETS", "sol, btc ,"),
            ("FEED_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("PIPELINE_WORKERS", "8"),
            ("PIPELINE_DEDUP_WINDOW", "0"),
            ("DELIVERY_WORKERS_PER_CHANNEL", "3"),
            ("RULE_PRICE_CHANGE_PCT", "2.5"),
            ("NOTIFY_HEALTH_PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(config.feed.assets, vec!["SOL", "BTC"]);
        assert_eq!(config.feed.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.dedup_window, 0);
        assert_eq!(config.delivery.workers_per_channel, 3);
        assert_eq!(config.rules.price_change_pct, Decimal::new(25, 1));
        assert_eq!(config.server.health_port, 9000);
    }

    #[test_case("PIPELINE_WORKERS", "four" ; "non numeric")]
    #[test_case("PIPELINE_WORKERS", "0" ; "zero workers")]
    #[test_case("NOTIFY_HEALTH_PORT", "70000" ; "port out of range")]
    #[test_case("RULE_FUNDING_RATE_ABS", "high" ; "non decimal threshold")]
    #[test_case("METRICS_EXPORT_INTERVAL_SECS", "0" ; "zero export interval")]
    #[test_case("FEED_PING_INTERVAL_SECS", "0" ; "zero ping interval")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key));
    }

    #[test_case("FEED_WS_URL", "" ; "empty url")]
    #[test_case("FEED_ASSETS", " , " ; "empty asset list")]
    fn empty_values_are_rejected(key: &str, value: &str) {
        assert_eq!(
            load(&[(key, value)]).unwrap_err(),
            ConfigError::EmptyValue(key.to_string())
        );
    }
}
