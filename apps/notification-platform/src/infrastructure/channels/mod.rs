//! Delivery Channel Adapters
//!
//! - `log`: structured tracing output
//! - `memory`: recording channel for tests and dry runs

mod log;
mod memory;

pub use log::LogChannel;
pub use memory::MemoryChannel;
