//! Cross-cutting configuration and store-call resilience.

pub mod config;
pub mod retry;

pub use retry::RetryPolicy;
