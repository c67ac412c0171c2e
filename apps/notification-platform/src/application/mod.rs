//! Application Layer
//!
//! Port traits the pipeline depends on and the services that drive it.
//! Depends only on the domain layer.

pub mod ports;
pub mod services;
