//! Configuration Module
//!
//! Environment-driven configuration for the platform binary.

mod settings;

pub use settings::{ConfigError, DEFAULT_FEED_URL, FeedSettings, PlatformConfig, ServerSettings};
