/*!
 * Batch summaries and live transfer counters
 */

use chrono::{DateTime, Utc};
use indicatif::HumanBytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::core::job::{BatchId, JobOutcome, OutcomeStatus};
use crate::error::{EXIT_PARTIAL, EXIT_SUCCESS};

/// Summary of one batch once (or while) it drains
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: BatchId,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_transferred: u64,
    pub bytes_failed: u64,
    pub bytes_skipped: u64,
    pub failures: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn from_outcomes(
        batch: BatchId,
        total: usize,
        outcomes: Vec<JobOutcome>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let mut report = Self {
            batch,
            started_at,
            elapsed,
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            bytes_transferred: 0,
            bytes_failed: 0,
            bytes_skipped: 0,
            failures: Vec::new(),
        };

        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Done => {
                    report.completed += 1;
                    report.bytes_transferred += outcome.bytes;
                }
                OutcomeStatus::Skipped => {
                    report.skipped += 1;
                    report.bytes_skipped += outcome.bytes;
                }
                OutcomeStatus::Failed => {
                    report.failed += 1;
                    report.bytes_failed += outcome.bytes;
                    report.failures.push(outcome);
                }
            }
        }

        report
    }

    /// Jobs that have reached a terminal state
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Every submitted job is accounted for
    pub fn is_complete(&self) -> bool {
        self.terminal() == self.total
    }

    /// Nothing failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }

    /// Average throughput over the batch, in bytes per second
    pub fn throughput_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// Print formatted summary
    pub fn print(&self) {
        println!("{}", self);
        println!(
            "Elapsed: {}, average {}/s",
            format_duration(self.elapsed),
            HumanBytes(self.throughput_bps() as u64)
        );
        for failure in &self.failures {
            println!(
                "  failed {} ({}, {} attempts): {}",
                failure.name,
                failure.direction,
                failure.attempts,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Success: {}/{}, Fail: {}/{}, Skip: {}/{}",
            self.completed + self.skipped,
            HumanBytes(self.bytes_transferred + self.bytes_skipped),
            self.failed,
            HumanBytes(self.bytes_failed),
            self.skipped,
            HumanBytes(self.bytes_skipped)
        )
    }
}

/// Live counters shared by workers and progress display
#[derive(Debug, Default)]
pub struct TransferCounters {
    required_count: AtomicU64,
    required_bytes: AtomicU64,
    completed_count: AtomicU64,
    failed_count: AtomicU64,
    skipped_count: AtomicU64,
    skipped_bytes: AtomicU64,
    transferred_bytes: AtomicU64,
}

impl TransferCounters {
    pub fn add_required(&self, count: u64, bytes: u64) {
        self.required_count.fetch_add(count, Ordering::Relaxed);
        self.required_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &JobOutcome) {
        match outcome.status {
            OutcomeStatus::Done => self.completed_count.fetch_add(1, Ordering::Relaxed),
            OutcomeStatus::Failed => self.failed_count.fetch_add(1, Ordering::Relaxed),
            OutcomeStatus::Skipped => {
                self.skipped_bytes.fetch_add(outcome.bytes, Ordering::Relaxed);
                self.skipped_count.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            required_count: self.required_count.load(Ordering::Relaxed),
            required_bytes: self.required_bytes.load(Ordering::Relaxed),
            completed_count: self.completed_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            skipped_count: self.skipped_count.load(Ordering::Relaxed),
            skipped_bytes: self.skipped_bytes.load(Ordering::Relaxed),
            transferred_bytes: self.transferred_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub required_count: u64,
    pub required_bytes: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub skipped_bytes: u64,
    pub transferred_bytes: u64,
}

impl CounterSnapshot {
    /// Jobs finished one way or another
    pub fn finished(&self) -> u64 {
        self.completed_count + self.failed_count + self.skipped_count
    }

    /// Bytes accounted for, moved or already present
    pub fn done_bytes(&self) -> u64 {
        self.transferred_bytes + self.skipped_bytes
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}
