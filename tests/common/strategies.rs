#![allow(dead_code)]

use std::time::Duration;

use mx_pipeline::orchestration::BackoffCalculatorConfig;
use mx_pipeline::ProcessStatus;
use proptest::prelude::*;

/// Any ledger status
pub fn status_strategy() -> impl Strategy<Value = ProcessStatus> {
    prop::sample::select(ProcessStatus::ALL.to_vec())
}

/// A sequence of requested status changes, as redeliveries might produce
pub fn status_requests_strategy() -> impl Strategy<Value = Vec<ProcessStatus>> {
    prop::collection::vec(status_strategy(), 0..20)
}

/// Input file names as they appear in the wild, including ones that already
/// contain the tag delimiter
pub fn file_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9_.-]{1,40}\\.xml",
        "[a-zA-Z0-9 ]{1,20}\\$[a-z]{0,5}\\.xml",
        "[a-z]{1,8}\\$\\$[a-z0-9]{1,8}",
        Just("pacs.008.001.08.xml".to_string()),
    ]
}

/// Valid ledger ids
pub fn process_id_strategy() -> impl Strategy<Value = i64> {
    1i64..=i64::MAX
}

/// Redelivery settings accepted by configuration validation
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffCalculatorConfig> {
    (1u64..5_000, 0u64..120_000, 1.0f64..10.0, 0.0f64..0.99).prop_map(
        |(initial_ms, extra_ms, multiplier, factor)| BackoffCalculatorConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(initial_ms + extra_ms),
            multiplier,
            collision_avoidance_factor: factor,
        },
    )
}
