//! Business logic services for the gateway.
//!
//! # Services
//!
//! - `reconciliation` - Identity reconciliation (check-or-create, ensure, sync,
//!   cache healing) and owner-verified replica creation

pub mod reconciliation;

pub use reconciliation::{
    CheckOutcome, EnsureOutcome, HealedUser, ReconcileError, ReconcileReport, Reconciler,
    ReplicaError,
};
