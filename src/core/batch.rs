/*!
 * Batch controller
 *
 * Tracks the one live batch of an engine through `Open → Draining → Closed`
 * and lets callers block until it drains.
 *
 * - the start sentinel (or a manifest scan) opens a batch
 * - names pushed while `Open` become jobs of that batch
 * - the end sentinel (or scan completion) moves it to `Draining`
 * - the last outstanding job moving it to `Closed` wakes every waiter
 *
 * Waiting is a condition variable on the caller's OS thread; it must not be
 * called from inside the engine's async runtime.
 */

use std::collections::HashSet;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::job::{BatchId, JobOutcome};
use crate::error::{Result, ShardlineError};
use crate::stats::BatchReport;

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting jobs
    Open,
    /// No more jobs will be added; waiting for in-flight work
    Draining,
    /// Every job reached a terminal state
    Closed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Open => write!(f, "open"),
            BatchState::Draining => write!(f, "draining"),
            BatchState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug)]
struct Batch {
    id: BatchId,
    state: BatchState,
    submitted: usize,
    pending: usize,
    outcomes: Vec<JobOutcome>,
    names: HashSet<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Batch {
    fn new(id: BatchId) -> Self {
        Self {
            id,
            state: BatchState::Open,
            submitted: 0,
            pending: 0,
            outcomes: Vec::new(),
            names: HashSet::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn report(&self) -> BatchReport {
        BatchReport::from_outcomes(
            self.id,
            self.submitted,
            self.outcomes.clone(),
            self.started_at,
            self.started.elapsed(),
        )
    }

    fn settle(&mut self) {
        if self.state == BatchState::Draining && self.pending == 0 {
            self.state = BatchState::Closed;
            tracing::info!(
                "batch {} closed: {} jobs, {} outcomes",
                self.id,
                self.submitted,
                self.outcomes.len()
            );
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    next_id: BatchId,
    current: Option<Batch>,
    /// Closed batch displaced by a newer one before anyone collected it
    retired: Option<Batch>,
    /// Last report handed to a waiter, shared with concurrent waiters
    collected: Option<(BatchId, BatchReport)>,
}

/// Owner of the live batch and its pending counter
#[derive(Debug, Default)]
pub struct BatchController {
    state: Mutex<ControllerState>,
    changed: Condvar,
}

/// Result of registering a name with the open batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New job accepted into batch
    Accepted(BatchId),
    /// Name already part of this batch
    Duplicate(BatchId),
}

impl BatchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new batch
    ///
    /// Blocks while a previous batch is still draining. Opening while a
    /// batch is open is a protocol violation.
    pub fn open(&self) -> Result<BatchId> {
        let mut guard = self.lock();
        while matches!(guard.current.as_ref().map(|b| b.state), Some(BatchState::Draining)) {
            guard = self
                .changed
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        if let Some(batch) = guard.current.as_ref() {
            if batch.state == BatchState::Open {
                return Err(ShardlineError::ProtocolViolation(format!(
                    "batch {} is already open",
                    batch.id
                )));
            }
        }

        if let Some(closed) = guard.current.take() {
            guard.retired = Some(closed);
        }

        guard.next_id += 1;
        let id = guard.next_id;
        guard.current = Some(Batch::new(id));
        tracing::info!("batch {} opened", id);
        Ok(id)
    }

    /// Add a job name to the open batch
    pub fn admit(&self, name: &str) -> Result<Admission> {
        let mut guard = self.lock();
        let batch = match guard.current.as_mut() {
            Some(batch) if batch.state == BatchState::Open => batch,
            Some(batch) => {
                return Err(ShardlineError::ProtocolViolation(format!(
                    "push of {:?} while batch {} is {}",
                    name, batch.id, batch.state
                )));
            }
            None => {
                return Err(ShardlineError::ProtocolViolation(format!(
                    "push of {:?} with no open batch",
                    name
                )));
            }
        };

        if !batch.names.insert(name.to_string()) {
            tracing::debug!("batch {}: duplicate name {} ignored", batch.id, name);
            return Ok(Admission::Duplicate(batch.id));
        }

        batch.submitted += 1;
        batch.pending += 1;
        Ok(Admission::Accepted(batch.id))
    }

    /// Stop accepting jobs (`Open → Draining`)
    pub fn close_intake(&self) -> Result<BatchId> {
        let mut guard = self.lock();
        let batch = match guard.current.as_mut() {
            Some(batch) if batch.state == BatchState::Open => batch,
            _ => {
                return Err(ShardlineError::ProtocolViolation(
                    "end of batch with no open batch".to_string(),
                ));
            }
        };

        batch.state = BatchState::Draining;
        tracing::info!("batch {} draining: {} pending", batch.id, batch.pending);
        batch.settle();
        let id = batch.id;
        drop(guard);
        self.changed.notify_all();
        Ok(id)
    }

    /// Record a terminal outcome for a job of `batch`
    pub fn complete(&self, batch: BatchId, outcome: JobOutcome) {
        let mut guard = self.lock();
        let Some(current) = guard.current.as_mut().filter(|b| b.id == batch) else {
            tracing::warn!("outcome for unknown batch {} dropped: {}", batch, outcome.name);
            return;
        };

        current.pending = current.pending.saturating_sub(1);
        current.outcomes.push(outcome);
        current.settle();
        let drained = current.pending == 0;
        drop(guard);

        if drained {
            self.changed.notify_all();
        }
    }

    /// Block until the current batch has no pending jobs
    ///
    /// Returns `None` when no batch is live. A draining batch is closed,
    /// discarded and its report returned. A batch still open (end marker not
    /// yet seen) stays open and a snapshot of it is returned.
    pub fn wait(&self) -> Result<Option<BatchReport>> {
        self.wait_until(None)
    }

    /// Like [`BatchController::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<BatchReport>> {
        self.wait_until(Some((Instant::now() + timeout, timeout)))
    }

    fn wait_until(&self, deadline: Option<(Instant, Duration)>) -> Result<Option<BatchReport>> {
        let mut guard = self.lock();
        let target = match guard.current.as_ref() {
            Some(batch) => batch.id,
            None => return Ok(None),
        };

        loop {
            if let Some(batch) = guard.current.as_ref().filter(|b| b.id == target) {
                if batch.pending == 0 {
                    if batch.state == BatchState::Open {
                        return Ok(Some(batch.report()));
                    }
                    if let Some(done) = guard.current.take() {
                        return Ok(Some(Self::collect(&mut guard, done)));
                    }
                }
            } else if guard.retired.as_ref().map(|b| b.id) == Some(target) {
                if let Some(done) = guard.retired.take() {
                    return Ok(Some(Self::collect(&mut guard, done)));
                }
            } else {
                // another waiter collected it first
                return Ok(guard
                    .collected
                    .as_ref()
                    .filter(|(id, _)| *id == target)
                    .map(|(_, report)| report.clone()));
            }

            guard = match deadline {
                None => self
                    .changed
                    .wait(guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some((at, timeout)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(ShardlineError::WaitTimeout(timeout));
                    }
                    self.changed
                        .wait_timeout(guard, at - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn collect(guard: &mut MutexGuard<'_, ControllerState>, batch: Batch) -> BatchReport {
        let report = batch.report();
        tracing::debug!("batch {} collected", batch.id);
        guard.collected = Some((batch.id, report.clone()));
        report
    }

    /// State of the live batch, if any
    pub fn state(&self) -> Option<(BatchId, BatchState)> {
        self.lock().current.as_ref().map(|b| (b.id, b.state))
    }

    /// Pending jobs of the live batch
    pub fn pending(&self) -> usize {
        self.lock().current.as_ref().map(|b| b.pending).unwrap_or(0)
    }

    /// Id of the open batch, if one is accepting jobs
    pub fn open_batch(&self) -> Option<BatchId> {
        self.lock()
            .current
            .as_ref()
            .filter(|b| b.state == BatchState::Open)
            .map(|b| b.id)
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{Direction, OutcomeStatus};
    use std::sync::Arc;
    use std::thread;

    fn outcome(name: &str, status: OutcomeStatus) -> JobOutcome {
        JobOutcome {
            job: 0,
            name: name.to_string(),
            direction: Direction::Push,
            status,
            attempts: 1,
            bytes: 4,
            error: None,
        }
    }

    #[test]
    fn test_wait_without_batch_returns_immediately() {
        let controller = BatchController::new();
        assert!(controller.wait().unwrap().is_none());
    }

    #[test]
    fn test_admit_requires_open_batch() {
        let controller = BatchController::new();
        let err = controller.admit("a").unwrap_err();
        assert!(matches!(err, ShardlineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_close_requires_open_batch() {
        let controller = BatchController::new();
        assert!(controller.close_intake().is_err());
    }

    #[test]
    fn test_double_open_is_violation() {
        let controller = BatchController::new();
        controller.open().unwrap();
        assert!(matches!(
            controller.open(),
            Err(ShardlineError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_duplicates_not_counted() {
        let controller = BatchController::new();
        let id = controller.open().unwrap();
        assert_eq!(controller.admit("a").unwrap(), Admission::Accepted(id));
        assert_eq!(controller.admit("a").unwrap(), Admission::Duplicate(id));
        assert_eq!(controller.pending(), 1);
    }

    #[test]
    fn test_empty_batch_closes_at_end_marker() {
        let controller = BatchController::new();
        controller.open().unwrap();
        controller.close_intake().unwrap();
        assert_eq!(controller.state().map(|s| s.1), Some(BatchState::Closed));

        let report = controller.wait().unwrap().unwrap();
        assert_eq!(report.total, 0);
        assert!(controller.state().is_none());
        // batch discarded; a second wait is a no-op
        assert!(controller.wait().unwrap().is_none());
    }

    #[test]
    fn test_wait_blocks_until_drained() {
        let controller = Arc::new(BatchController::new());
        let id = controller.open().unwrap();
        controller.admit("a").unwrap();
        controller.admit("b").unwrap();
        controller.close_intake().unwrap();

        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                controller.complete(id, outcome("a", OutcomeStatus::Done));
                thread::sleep(Duration::from_millis(30));
                controller.complete(id, outcome("b", OutcomeStatus::Failed));
            })
        };

        let report = controller.wait().unwrap().unwrap();
        worker.join().unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.is_complete());
    }

    #[test]
    fn test_wait_on_open_batch_keeps_it_open() {
        let controller = BatchController::new();
        let id = controller.open().unwrap();
        controller.admit("a").unwrap();
        controller.complete(id, outcome("a", OutcomeStatus::Done));

        let snapshot = controller.wait().unwrap().unwrap();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(controller.open_batch(), Some(id));
        assert!(controller.admit("b").is_ok());
    }

    #[test]
    fn test_wait_timeout() {
        let controller = BatchController::new();
        controller.open().unwrap();
        controller.admit("slow").unwrap();
        controller.close_intake().unwrap();

        let err = controller
            .wait_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ShardlineError::WaitTimeout(_)));
        assert_eq!(controller.pending(), 1);
    }

    #[test]
    fn test_open_waits_for_draining_batch() {
        let controller = Arc::new(BatchController::new());
        let first = controller.open().unwrap();
        controller.admit("a").unwrap();
        controller.close_intake().unwrap();

        let finisher = {
            let controller = controller.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                controller.complete(first, outcome("a", OutcomeStatus::Done));
            })
        };

        let second = controller.open().unwrap();
        finisher.join().unwrap();
        assert!(second > first);
        assert_eq!(controller.open_batch(), Some(second));
    }

    #[test]
    fn test_concurrent_waiters_share_report() {
        let controller = Arc::new(BatchController::new());
        let id = controller.open().unwrap();
        controller.admit("a").unwrap();
        controller.close_intake().unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let controller = controller.clone();
                thread::spawn(move || controller.wait().unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        controller.complete(id, outcome("a", OutcomeStatus::Skipped));

        for waiter in waiters {
            let report = waiter.join().unwrap().unwrap();
            assert_eq!(report.skipped, 1);
        }
    }
}
