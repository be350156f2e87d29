//! # Process Record
//!
//! One ledger row per ingested message, plus the audit trail of its status
//! changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::state_machine::ProcessStatus;

/// Server-generated ledger identifier.
///
/// Travels as a string in envelope headers and filenames; stored as BIGINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(i64);

impl ProcessId {
    pub fn get(self) -> i64 {
        self.0
    }

    /// Ledger sequences start at 1
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl From<i64> for ProcessId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid process id: '{s}'"))?;
        let id = Self(value);
        if id.is_valid() {
            Ok(id)
        } else {
            Err(format!("Invalid process id: '{s}'"))
        }
    }
}

impl Serialize for ProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Persistent workflow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    /// Original input file name
    pub name: String,
    /// Raw content with line breaks removed
    pub payload: String,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit entry written for every accepted status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub process_id: ProcessId,
    /// `None` for the creation entry
    pub from_status: Option<ProcessStatus>,
    pub to_status: ProcessStatus,
    pub transitioned_at: DateTime<Utc>,
}
