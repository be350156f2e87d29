//! # Pipeline Constants
//!
//! Names shared by every stage: the filename tag delimiter, route
//! identifiers, claim-key namespaces and the message-type sentinel.

/// Reserved delimiter used by the filename tagging scheme. Tagged names look
/// like `$$<process id>$$<original name>`.
pub const FILENAME_DELIMITER: &str = "$";

/// Sentinel used when a message type cannot be identified
pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown";

/// Message type supported out of the box
pub const PACS_008_001_08: &str = "pacs.008.001.08";

/// Route identifiers attached to log lines and dead-letter payloads
pub mod routes {
    pub const FILE_INGESTION: &str = "file-ingestion";
    pub const IN_PROGRESS_RECOVERY: &str = "in-progress-recovery";
    pub const VALIDATION: &str = "mx-validation";

    /// Route id of the type processor consuming `message_type_id`
    pub fn type_processor(message_type_id: &str) -> String {
        format!("mx-{message_type_id}")
    }
}

/// Claim-key namespaces
pub mod claims {
    pub const INGEST_PREFIX: &str = "ingest:";
    pub const INFLIGHT_PREFIX: &str = "inflight:";
}

/// Normalize a possibly blank value to [`UNKNOWN_MESSAGE_TYPE`]
pub fn unknown_if_blank(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_MESSAGE_TYPE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_unknown() {
        assert_eq!(unknown_if_blank(None), "unknown");
        assert_eq!(unknown_if_blank(Some("")), "unknown");
        assert_eq!(unknown_if_blank(Some("   ")), "unknown");
        assert_eq!(unknown_if_blank(Some("pacs.008.001.08")), "pacs.008.001.08");
    }

    #[test]
    fn type_processor_routes_are_prefixed() {
        assert_eq!(routes::type_processor(PACS_008_001_08), "mx-pacs.008.001.08");
    }
}
