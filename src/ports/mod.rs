//! Port traits. API boundaries for the hexagon.
//!
//! - Inbound: Called by UI/adapter into the application
//! - Outbound: Called by application into the entity store

pub mod inbound;
pub mod outbound;

pub use inbound::InputPort;
pub use outbound::{EntityStore, ListFilter, decode, decode_all, doc_id};
