//! Infrastructure adapters. Implement outbound ports.
//!
//! Entity stores (memory, SQLite, HTTP), report export, operator console.
//! Map errors to StoreError / DomainError.

pub mod export;
pub mod http;
pub mod persistence;
pub mod ui;
