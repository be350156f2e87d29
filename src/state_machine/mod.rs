//! Process status state machine
//!
//! The ledger is the single source of truth for workflow status. This module
//! defines the status enum and the transition rule every ledger backend
//! enforces atomically.

pub mod guards;
pub mod states;

pub use guards::{allowed_predecessors, is_transition_allowed, StatusTransitionGuard};
pub use states::ProcessStatus;
