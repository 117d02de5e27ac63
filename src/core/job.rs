/*!
 * Transfer jobs and their state machine
 *
 * ```text
 * Queued ──► Signing ──► Transferring ──► Done
 *    ▲          │             │
 *    └──────────┴─────────────┤ retryable failure, attempts left
 *               │             │
 *               └─────────────┴──► Failed
 * ```
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, ShardlineError};
use crate::layout::DatasetLayout;

/// Identifier of a batch within one engine
pub type BatchId = u64;

/// Which way the bytes flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote object to local file
    Pull,
    /// Local file to remote object
    Push,
}

impl Direction {
    /// Name the signing service uses for this direction
    pub fn presign_verb(&self) -> &'static str {
        match self {
            Direction::Pull => "download",
            Direction::Push => "upload",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => write!(f, "pull"),
            Direction::Push => write!(f, "push"),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum JobState {
    Queued,
    Signing,
    Transferring,
    Done,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    /// Whether moving from `self` to `next` is a legal edge
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Signing)
                | (Signing, Transferring)
                | (Transferring, Done)
                | (Signing, Failed(_))
                | (Transferring, Failed(_))
                | (Signing, Queued)
                | (Transferring, Queued)
                // skip-if-present finishes without signing
                | (Queued, Done)
                | (Queued, Failed(_))
        )
    }

    fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Signing => "signing",
            JobState::Transferring => "transferring",
            JobState::Done => "done",
            JobState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// One unit of transfer work
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: u64,
    pub batch: BatchId,
    pub name: String,
    pub direction: Direction,
    /// Dataset the job belongs to; part files live under its `temp/`
    pub dataset: DatasetLayout,
    /// `data/<name>` for pulls, `<root>/<name>` for pushes
    pub local_path: PathBuf,
    pub state: JobState,
    pub attempt: u32,
    pub expected_bytes: Option<u64>,
    pub bytes_transferred: u64,
}

impl TransferJob {
    /// Fails with `InvalidName` when the name escapes the dataset
    pub fn new(
        id: u64,
        batch: BatchId,
        name: impl Into<String>,
        direction: Direction,
        dataset: DatasetLayout,
        expected_bytes: Option<u64>,
    ) -> Result<Self> {
        let name = name.into();
        let local_path = match direction {
            Direction::Pull => dataset.pull_target(&name)?,
            Direction::Push => dataset.push_source(&name)?,
        };
        Ok(Self {
            id,
            batch,
            name,
            direction,
            dataset,
            local_path,
            state: JobState::Queued,
            attempt: 0,
            expected_bytes,
            bytes_transferred: 0,
        })
    }

    /// Move to `next`, rejecting edges the state machine does not allow
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(ShardlineError::ProtocolViolation(format!(
                "job {} ({}): illegal transition {} -> {}",
                self.id, self.name, self.state, next
            )));
        }
        tracing::trace!(job = self.id, name = %self.name, from = %self.state, to = %next, "job transition");
        self.state = next;
        Ok(())
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Done,
    Skipped,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Done => write!(f, "done"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for OutcomeStatus {
    type Err = ShardlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "done" => Ok(OutcomeStatus::Done),
            "skipped" => Ok(OutcomeStatus::Skipped),
            "failed" => Ok(OutcomeStatus::Failed),
            _ => Err(ShardlineError::Config(format!("Invalid outcome status: {}", s))),
        }
    }
}

/// Terminal record a worker hands back to its batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: u64,
    pub name: String,
    pub direction: Direction,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub bytes: u64,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status != OutcomeStatus::Failed
    }
}
