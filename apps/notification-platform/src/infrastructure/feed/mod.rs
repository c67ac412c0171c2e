//! Feed Monitor Adapters
//!
//! - `websocket`: live Hyperliquid WebSocket feed with reconnect
//! - `mock`: caller-driven feed for tests and dry runs

pub mod codec;
mod mock;
pub mod reconnect;
mod websocket;

pub use mock::MockFeedMonitor;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::{WebSocketFeedConfig, WebSocketFeedMonitor};
