//! Fetch cycle metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder the
//! calls are no-ops.

use fw_core::{CycleError, CycleReport};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::Once;

pub const INCIDENTS_EMITTED: &str = "fw_incidents_emitted_total";
pub const ITEMS_SKIPPED: &str = "fw_items_skipped_total";
pub const POLL_FAILURES: &str = "fw_poll_failures_total";
pub const POLL_DURATION: &str = "fw_poll_duration_seconds";
pub const POLLS_TRUNCATED: &str = "fw_polls_truncated_total";
pub const PAGES_FETCHED: &str = "fw_pages_fetched_total";
pub const LAST_SUCCESS: &str = "fw_last_success_timestamp_seconds";

static DESCRIBE: Once = Once::new();

/// Records fetch cycle outcomes per source.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchMetrics;

impl FetchMetrics {
    /// Creates a collector, registering metric descriptions once per process.
    pub fn new() -> Self {
        DESCRIBE.call_once(Self::register_metrics);
        Self
    }

    fn register_metrics() {
        describe_counter!(INCIDENTS_EMITTED, "Incidents delivered to the sink");
        describe_counter!(
            ITEMS_SKIPPED,
            "Vendor records dropped by the engine, by reason"
        );
        describe_counter!(POLL_FAILURES, "Fetch cycles that failed, by error kind");
        describe_counter!(
            POLLS_TRUNCATED,
            "Polls stopped by a limit before the source ran dry"
        );
        describe_counter!(PAGES_FETCHED, "Pages requested from vendor APIs");
        describe_histogram!(POLL_DURATION, "Duration of a fetch cycle");
        describe_gauge!(
            LAST_SUCCESS,
            "Unix time of the last successful fetch cycle"
        );
    }

    /// Records a completed cycle.
    pub fn record_cycle(&self, report: &CycleReport, finished_at_unix_secs: f64) {
        let source = report.source.clone();
        let stats = &report.stats;

        counter!(INCIDENTS_EMITTED, "source" => source.clone())
            .increment(report.incidents_emitted as u64);
        counter!(PAGES_FETCHED, "source" => source.clone()).increment(stats.pages_fetched as u64);

        for (reason, count) in [
            ("duplicate", stats.duplicates_dropped),
            ("stale", stats.stale_dropped),
            ("malformed", stats.malformed_skipped),
        ] {
            if count > 0 {
                counter!(ITEMS_SKIPPED, "source" => source.clone(), "reason" => reason)
                    .increment(count as u64);
            }
        }

        if stats.truncated {
            counter!(POLLS_TRUNCATED, "source" => source.clone()).increment(1);
        }

        histogram!(POLL_DURATION, "source" => source.clone(), "status" => "success")
            .record(report.duration.as_secs_f64());
        gauge!(LAST_SUCCESS, "source" => source).set(finished_at_unix_secs);
    }

    /// Records a failed cycle.
    pub fn record_failure(&self, source: &str, error: &CycleError, duration_secs: f64) {
        counter!(POLL_FAILURES, "source" => source.to_string(), "kind" => error.kind())
            .increment(1);
        histogram!(POLL_DURATION, "source" => source.to_string(), "status" => "failure")
            .record(duration_secs);
    }
}
