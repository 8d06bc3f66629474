//! Per-source results and run-level records

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Outcome of syncing one source.
///
/// Every unique enumerated item lands in exactly one of `local`,
/// `downloaded`, `download_errors`, `restricted`, `missing_locator`,
/// `type_excluded` or `deferred`. `duplicates`, `invalid` and
/// `scan_warnings` are diagnostics outside that partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub source_id: String,
    pub source_name: String,
    /// Unique items enumerated
    pub indexed: usize,
    /// Already present in the archive
    pub local: usize,
    /// Saved during this run
    pub downloaded: usize,
    /// Attempted this run and failed
    pub download_errors: usize,
    /// Flagged by the source or denied access on an earlier run
    #[serde(default)]
    pub restricted: usize,
    /// No usable download locator
    #[serde(default)]
    pub missing_locator: usize,
    /// Asset type not enabled for download
    #[serde(default)]
    pub type_excluded: usize,
    /// New but not attempted (item limit or cancellation)
    #[serde(default)]
    pub deferred: usize,
    #[serde(default)]
    pub duplicates: usize,
    /// Rejected by item validation
    #[serde(default)]
    pub invalid: usize,
    #[serde(default)]
    pub scan_warnings: usize,
    /// Whole-source failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new(source_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    /// Result for a source whose enumeration failed outright
    pub fn failed(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(source_id, source_name)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Sum of the partition buckets
    pub fn accounted(&self) -> usize {
        self.local
            + self.downloaded
            + self.download_errors
            + self.restricted
            + self.missing_locator
            + self.type_excluded
            + self.deferred
    }

    /// Whether every indexed item is in exactly one bucket
    pub fn is_balanced(&self) -> bool {
        self.accounted() == self.indexed
    }
}

/// Grand totals across sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub downloaded: usize,
    pub local: usize,
    /// Sum of per-source download errors
    pub errors: usize,
    #[serde(default)]
    pub failed_sources: usize,
}

impl RunTotals {
    pub fn from_results(results: &[SyncResult]) -> Self {
        results.iter().fold(Self::default(), |mut totals, result| {
            totals.downloaded += result.downloaded;
            totals.local += result.local;
            totals.errors += result.download_errors;
            if result.is_failed() {
                totals.failed_sources += 1;
            }
            totals
        })
    }
}

/// One sync invocation, appended to the sync log and never changed after
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub cancelled: bool,
    pub sources: Vec<SyncResult>,
    pub totals: RunTotals,
}

impl SyncRun {
    pub fn new(
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        duration_ms: u64,
        cancelled: bool,
        sources: Vec<SyncResult>,
    ) -> Self {
        let totals = RunTotals::from_results(&sources);
        Self {
            run_id,
            timestamp,
            duration_ms,
            cancelled,
            sources,
            totals,
        }
    }

    /// Emit the structured completion log line
    pub fn log_completion(&self) {
        info!(
            run_id = %self.run_id,
            duration_secs = self.duration_ms as f64 / 1000.0,
            sources = self.sources.len(),
            downloaded = self.totals.downloaded,
            local = self.totals.local,
            errors = self.totals.errors,
            failed_sources = self.totals.failed_sources,
            cancelled = self.cancelled,
            "Sync run completed"
        );
    }

    /// Human readable per-source table plus totals
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:>7} {:>6} {:>10} {:>6} {:>10} {:>8}",
            "SOURCE", "INDEXED", "LOCAL", "DOWNLOADED", "ERRORS", "RESTRICTED", "SKIPPED"
        );

        for result in &self.sources {
            let skipped = result.missing_locator + result.type_excluded + result.deferred;
            let _ = writeln!(
                out,
                "{:<24} {:>7} {:>6} {:>10} {:>6} {:>10} {:>8}",
                truncate(&result.source_name, 24),
                result.indexed,
                result.local,
                result.downloaded,
                result.download_errors,
                result.restricted,
                skipped
            );
            if let Some(error) = &result.error {
                let _ = writeln!(out, "  ! {}", error);
            }
        }

        let _ = write!(
            out,
            "Total: {} downloaded, {} already local, {} errors, {} failed sources{}",
            self.totals.downloaded,
            self.totals.local,
            self.totals.errors,
            self.totals.failed_sources,
            if self.cancelled { " (cancelled)" } else { "" }
        );
        out
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
        cut.push('~');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_fold_results() {
        let mut a = SyncResult::new("a", "Feed A");
        a.indexed = 5;
        a.local = 2;
        a.downloaded = 2;
        a.download_errors = 1;
        let b = SyncResult::failed("b", "Feed B", "unreachable");

        let run = SyncRun::new(Uuid::new_v4(), Utc::now(), 10, false, vec![a.clone(), b]);
        assert!(a.is_balanced());
        assert_eq!(
            run.totals,
            RunTotals {
                downloaded: 2,
                local: 2,
                errors: 1,
                failed_sources: 1
            }
        );
    }

    #[test]
    fn test_summary_lists_every_source_and_errors() {
        let run = SyncRun::new(
            Uuid::new_v4(),
            Utc::now(),
            0,
            true,
            vec![SyncResult::failed("b", "A feed with a really long display name", "unreachable")],
        );
        let summary = run.summary();
        assert!(summary.contains("A feed with a really lo~"));
        assert!(summary.contains("! unreachable"));
        assert!(summary.ends_with("(cancelled)"));
    }

    #[test]
    fn test_old_records_without_new_buckets_deserialize() {
        let json = r#"{"source_id":"a","source_name":"A","indexed":1,"local":1,"downloaded":0,"download_errors":0}"#;
        let result: SyncResult = serde_json::from_str(json).unwrap();
        assert!(result.is_balanced());
    }
}
