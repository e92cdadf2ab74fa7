//! Remote entity store over HTTP.

pub mod rest_store;

pub use rest_store::RestStore;
