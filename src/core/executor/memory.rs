//! Memory probes and worker sizing
//!
//! Best-effort readings from procfs; on platforms without it the pool
//! simply never resizes.

/// Process resident set size in kilobytes
#[must_use]
pub fn current_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            return rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse::<u64>()
                .ok();
        }
    }
    None
}

/// System memory pressure as a percentage used (0..100)
#[must_use]
pub fn memory_pressure_pct() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(rest);
        }
    }
    let (total, available) = (total?, available?);
    if total == 0 {
        return None;
    }
    Some((1.0 - available as f64 / total as f64) * 100.0)
}

fn parse_kb(rest: &str) -> Option<u64> {
    rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()
}

/// Worker count at pool start
///
/// Estimated optimal is 0.75 of the available cores for an I/O-bound mix,
/// clamped to [10, 20], then bounded by the configured min and max.
#[must_use]
pub fn initial_worker_count(min_workers: usize, max_workers: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(8);
    let estimated = ((cores as f64) * 0.75).ceil() as usize;
    let estimated = estimated.clamp(10, 20);
    min_workers.max(max_workers.min(estimated))
}
