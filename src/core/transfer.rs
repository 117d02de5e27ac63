/*!
 * Per-job transfer routine - skip check, sign, move bytes, retry
 *
 * Pulls land in `temp/` first and reach `data/<name>` only through a rename,
 * so an interrupted run never leaves a partial file at the final path. Part
 * files of a multi-part pull survive failures and are reused by the next
 * attempt (or the next run) when their length is already right.
 */

use std::path::Path;
use std::sync::Arc;

use shardline_core_resilience::{Backoff, Throttle};
use tokio::fs;

use super::job::{Direction, JobOutcome, JobState, OutcomeStatus, TransferJob};
use super::presign::Presigner;
use super::transport::{ByteRange, Transport};
use crate::config::{Network, SkipPolicy};
use crate::error::{Result, ShardlineError};
use crate::stats::TransferCounters;

/// Everything a worker needs to run a job, shared by the whole pool
pub struct TransferContext {
    pub network: Network,
    pub chunk_size: u64,
    pub skip_policy: SkipPolicy,
    pub backoff: Backoff,
    pub throttle: Throttle,
    pub presigner: Arc<dyn Presigner>,
    pub transport: Arc<dyn Transport>,
    pub counters: Arc<TransferCounters>,
}

/// Drive one job to a terminal state
///
/// Never returns an error: whatever happens ends up in the outcome.
pub async fn run_job(ctx: &TransferContext, mut job: TransferJob) -> JobOutcome {
    if job.direction == Direction::Pull {
        if let Some(existing) = skip_existing(&job.local_path, job.expected_bytes, ctx.skip_policy).await {
            tracing::debug!("{} already present ({} bytes), skipping", job.name, existing);
            if let Err(e) = job.transition(JobState::Done) {
                return failed(job, e);
            }
            return outcome(&job, OutcomeStatus::Skipped, existing, None);
        }
    }

    if job.direction == Direction::Push {
        match local_size(&job).await {
            Ok(size) => job.expected_bytes = Some(size),
            Err(e) => return failed(job, e),
        }
    }

    loop {
        job.attempt += 1;
        match attempt(ctx, &mut job).await {
            Ok(bytes) => {
                job.bytes_transferred = bytes;
                if let Err(e) = job.transition(JobState::Done) {
                    return failed(job, e);
                }
                tracing::info!("{} {} done: {} bytes", job.direction, job.name, bytes);
                return outcome(&job, OutcomeStatus::Done, bytes, None);
            }
            Err(e) if e.is_retryable() && ctx.backoff.allows(job.attempt) => {
                let delay = ctx.backoff.delay(job.attempt);
                tracing::warn!(
                    "{} {} attempt {}/{} failed: {}; retrying in {:?}",
                    job.direction,
                    job.name,
                    job.attempt,
                    ctx.backoff.max_attempts(),
                    e,
                    delay
                );
                if let Err(e) = job.transition(JobState::Queued) {
                    return failed(job, e);
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                let attempts = job.attempt;
                return failed(
                    job,
                    ShardlineError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    },
                );
            }
            Err(e) => return failed(job, e),
        }
    }
}

async fn attempt(ctx: &TransferContext, job: &mut TransferJob) -> Result<u64> {
    job.transition(JobState::Signing)?;
    let url = ctx.presigner.resolve(&job.name, job.direction, ctx.network).await?;

    job.transition(JobState::Transferring)?;
    match job.direction {
        Direction::Pull => pull(ctx, job, &url).await,
        Direction::Push => push(ctx, job, &url).await,
    }
}

async fn pull(ctx: &TransferContext, job: &TransferJob, url: &str) -> Result<u64> {
    let name = job.name.as_str();
    let target = &job.local_path;
    let staging = job.dataset.staging_path(name)?;

    let size = match job.expected_bytes {
        // unknown size (or an empty object): one unranged GET
        None | Some(0) => {
            let written = ctx
                .transport
                .fetch(name, url, None, &staging, Some(&ctx.throttle))
                .await?;
            if let Some(expected) = job.expected_bytes {
                if written != expected {
                    return Err(size_mismatch(name, written, expected));
                }
            }
            ctx.counters.add_transferred(written);
            promote(&staging, target).await?;
            return Ok(written);
        }
        Some(size) => size,
    };

    let ranges = ByteRange::split(size, ctx.chunk_size);
    if ranges.len() == 1 {
        let written = ctx
            .transport
            .fetch(name, url, Some(ranges[0]), &staging, Some(&ctx.throttle))
            .await?;
        ctx.counters.add_transferred(written);
        promote(&staging, target).await?;
        return Ok(written);
    }

    let mut parts = Vec::with_capacity(ranges.len());
    let mut moved = 0u64;
    for (idx, range) in ranges.iter().enumerate() {
        let part = job.dataset.part_path(name, idx as u64)?;
        if file_len(&part).await == Some(range.len()) {
            tracing::debug!("{} part {} ({}) reused", name, idx, range);
        } else {
            let written = ctx
                .transport
                .fetch(name, url, Some(*range), &part, Some(&ctx.throttle))
                .await?;
            ctx.counters.add_transferred(written);
            moved += written;
        }
        parts.push(part);
    }

    let merge = job.dataset.merge_path(name)?;
    let merged = concat_parts(&parts, &merge).await?;
    if merged != size {
        if let Err(e) = fs::remove_file(&merge).await {
            tracing::warn!("could not remove {}: {}", merge.display(), e);
        }
        return Err(size_mismatch(name, merged, size));
    }
    promote(&merge, target).await?;
    for part in &parts {
        if let Err(e) = fs::remove_file(part).await {
            tracing::warn!("could not remove {}: {}", part.display(), e);
        }
    }

    tracing::debug!("{}: {} parts, {} bytes fetched this attempt", name, parts.len(), moved);
    Ok(size)
}

async fn push(ctx: &TransferContext, job: &TransferJob, url: &str) -> Result<u64> {
    let size = match job.expected_bytes {
        Some(size) => size,
        None => local_size(job).await?,
    };
    let sent = ctx
        .transport
        .upload(&job.name, url, &job.local_path, size, &ctx.throttle)
        .await?;
    ctx.counters.add_transferred(sent);
    Ok(sent)
}

/// Size of a push job's local file; a missing file is not worth retrying
async fn local_size(job: &TransferJob) -> Result<u64> {
    match fs::metadata(&job.local_path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(ShardlineError::TransferFailure {
            name: job.name.clone(),
            status: None,
            reason: format!("{} is not a regular file", job.local_path.display()),
            transient: false,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ShardlineError::TransferFailure {
            name: job.name.clone(),
            status: None,
            reason: format!("local file {} not found", job.local_path.display()),
            transient: false,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Bytes already present at `path` when the policy says the job can be skipped
pub async fn skip_existing(path: &Path, expected: Option<u64>, policy: SkipPolicy) -> Option<u64> {
    if policy == SkipPolicy::Never {
        return None;
    }
    let meta = fs::metadata(path).await.ok().filter(|m| m.is_file())?;
    match policy {
        SkipPolicy::Exists => Some(meta.len()),
        SkipPolicy::Size => expected.filter(|&size| size == meta.len()),
        SkipPolicy::Never => None,
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).await.ok().filter(|m| m.is_file()).map(|m| m.len())
}

async fn concat_parts(parts: &[std::path::PathBuf], merge: &Path) -> Result<u64> {
    if let Some(parent) = merge.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut out = fs::File::create(merge).await?;
    let mut total = 0u64;
    for part in parts {
        let mut input = fs::File::open(part).await?;
        total += tokio::io::copy(&mut input, &mut out).await?;
    }
    out.sync_all().await?;
    Ok(total)
}

/// Rename a finished temp file into its final place
async fn promote(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(from, to).await?;
    Ok(())
}

fn size_mismatch(name: &str, got: u64, expected: u64) -> ShardlineError {
    ShardlineError::TransferFailure {
        name: name.to_string(),
        status: None,
        reason: format!("size mismatch: got {} bytes, expected {}", got, expected),
        transient: true,
    }
}

fn outcome(job: &TransferJob, status: OutcomeStatus, bytes: u64, error: Option<String>) -> JobOutcome {
    JobOutcome {
        job: job.id,
        name: job.name.clone(),
        direction: job.direction,
        status,
        attempts: job.attempt,
        bytes,
        error,
    }
}

fn failed(mut job: TransferJob, error: ShardlineError) -> JobOutcome {
    tracing::error!(
        category = %error.category(),
        "{} {} failed after {} attempt(s): {}",
        job.direction,
        job.name,
        job.attempt,
        error
    );
    let reason = error.to_string();
    if !job.state.is_terminal() {
        if let Err(e) = job.transition(JobState::Failed(reason.clone())) {
            tracing::warn!("{}: {}", job.name, e);
        }
    }
    // bytes the batch still lacks for this object
    let missing = job.expected_bytes.unwrap_or(0);
    outcome(&job, OutcomeStatus::Failed, missing, Some(reason))
}
