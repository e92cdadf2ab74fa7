//! campus-sync: relation reconciliation and eligibility rules for a university portal,
//! with Hexagonal Architecture.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
