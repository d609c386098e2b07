//! Default values for configuration fields

use std::path::PathBuf;

pub(super) fn default_store_url() -> String {
    "sqlite://civicpulse.db?mode=rwc".to_string()
}

pub(super) fn default_scrapers_dir() -> PathBuf {
    PathBuf::from("scrapers")
}

pub(super) fn default_progress_path() -> PathBuf {
    PathBuf::from("progress")
}

pub(super) fn default_min_workers() -> usize {
    10
}

pub(super) fn default_max_workers() -> usize {
    20
}

pub(super) fn default_timeout_seconds() -> u64 {
    300
}

pub(super) fn default_max_retry_attempts() -> u32 {
    3
}

pub(super) fn default_rate_limit_per_host_rps() -> f64 {
    2.0
}

pub(super) fn default_rate_limit_burst() -> u32 {
    4
}

pub(super) fn default_stream_buffer_seconds() -> u64 {
    300
}

pub(super) fn default_inactive_after_missed_runs() -> i64 {
    3
}

pub(super) fn default_bind_addr() -> String {
    "127.0.0.1:8722".to_string()
}

pub(super) fn default_parliamentary_concurrency() -> usize {
    2
}

pub(super) fn default_provincial_concurrency() -> usize {
    8
}

pub(super) fn default_municipal_concurrency() -> usize {
    20
}

pub(super) fn default_civic_concurrency() -> usize {
    4
}

pub(super) fn default_update_concurrency() -> usize {
    4
}
