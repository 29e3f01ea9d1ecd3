//! Append-only audit trail of guard layer decisions.
//!
//! Every layer the guard evaluates writes exactly one [`GuardDecision`].
//! The [`AuditLog`] capability exposes appends and reads only; the
//! PostgreSQL backend additionally rejects UPDATE and DELETE in the database.

pub mod builder;
mod decision;
mod log;

pub use decision::{DecisionEvent, DecisionFilter, GuardDecision, GuardLayer};
pub use log::{AuditLog, MemoryAuditLog};
