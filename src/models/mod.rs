//! Ledger data model

pub mod process_record;

pub use process_record::{ProcessId, ProcessRecord, StatusTransition};
