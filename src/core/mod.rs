//! core
//!
//! Core domain types and shared plumbing for the conveyor.
//!
//! # Modules
//!
//! - [`types`] - Strong types: PlanId, PlanStatus, RiskTier, etc.
//! - [`paths`] - Centralized path routing for conveyor storage
//! - [`env`] - Explicit environment abstraction
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Every storage location is routed through one module
//! - Environment reads are injectable for tests

pub mod env;
pub mod paths;
pub mod types;
