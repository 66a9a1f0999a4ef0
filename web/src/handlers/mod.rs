//! HTTP request handlers.

pub mod health;
pub mod loyalty;

pub use health::{health_check, metrics, readiness};
