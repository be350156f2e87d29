use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow status of one ingested message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Ledger record created at ingestion
    Created,
    /// Payload is well-formed and of a supported type
    Validated,
    /// Type processor finished and the artifact reached the success sink
    Completed,
    /// No handler for the file extension or message type
    Unsupported,
    /// Terminal failure, reachable from any state
    Failed,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 5] = [
        Self::Created,
        Self::Validated,
        Self::Completed,
        Self::Unsupported,
        Self::Failed,
    ];

    /// Position along `CREATED < VALIDATED < COMPLETED`. UNSUPPORTED shares
    /// COMPLETED's rank; FAILED ranks above everything.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Validated => 1,
            Self::Completed | Self::Unsupported => 2,
            Self::Failed => 3,
        }
    }

    /// Check if this is a terminal state (no further forward transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Unsupported | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Validated => "VALIDATED",
            Self::Completed => "COMPLETED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "VALIDATED" => Ok(Self::Validated),
            "COMPLETED" => Ok(Self::Completed),
            "UNSUPPORTED" => Ok(Self::Unsupported),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid process status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for status in ProcessStatus::ALL {
            let parsed: ProcessStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("created".parse::<ProcessStatus>().is_err());
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json = serde_json::to_string(&ProcessStatus::Unsupported).unwrap();
        assert_eq!(json, "\"UNSUPPORTED\"");
    }

    #[test]
    fn terminal_states() {
        assert!(!ProcessStatus::Created.is_terminal());
        assert!(!ProcessStatus::Validated.is_terminal());
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Unsupported.is_terminal());
        assert!(ProcessStatus::Failed.is_terminal());
    }
}
