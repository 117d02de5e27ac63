/*!
 * Transfer engine
 *
 * Owns the async runtime, the worker pool, the shared throttle and the batch
 * controller. The public calls are synchronous: `push` enqueues and returns,
 * `wait` and `multi_download` block the calling thread until a batch drains.
 * None of them may be called from inside the engine's own runtime.
 *
 * Push framing:
 *
 * ```text
 * push("---start---")   open a batch
 * push("meta/a.bin")    enqueue an upload of <root>/meta/a.bin
 * push("---end---")     no more jobs for this batch
 * wait()                block until every job is Done or Failed
 * ```
 */

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shardline_core_resilience::{Backoff, Throttle};
use tokio::runtime::Runtime;

use crate::config::{EngineConfig, Network};
use crate::core::batch::{Admission, BatchController};
use crate::core::job::{Direction, JobOutcome, OutcomeStatus, TransferJob};
use crate::core::presign::{HttpPresigner, Presigner};
use crate::core::queue::JobQueue;
use crate::core::transfer::TransferContext;
use crate::core::transport::{HttpTransport, Transport};
use crate::core::worker::WorkerPool;
use crate::error::{Result, ShardlineError};
use crate::layout::DatasetLayout;
use crate::manifest::scan_manifests;
use crate::stats::{BatchReport, TransferCounters};

/// Payload that opens a push batch
pub const START_SENTINEL: &str = "---start---";

/// Payload that ends intake for the open push batch
pub const END_SENTINEL: &str = "---end---";

pub struct Engine {
    config: EngineConfig,
    layout: DatasetLayout,
    queue: Arc<JobQueue>,
    controller: Arc<BatchController>,
    counters: Arc<TransferCounters>,
    throttle: Throttle,
    workers: WorkerPool,
    next_job: AtomicU64,
    runtime: Option<Runtime>,
}

impl Engine {
    /// Build an engine talking HTTP to the configured presign service
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let client = build_client(&config)?;
        let presigner = HttpPresigner::new(client.clone(), &config.presign_endpoint)?;
        let transport = HttpTransport::new(client);

        Self::with_backends(config, Arc::new(presigner), Arc::new(transport))
    }

    /// Build an engine over caller-supplied presigner and transport
    pub fn with_backends(
        config: EngineConfig,
        presigner: Arc<dyn Presigner>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate_limits()?;

        let runtime = build_runtime(&config)?;
        let backoff = Backoff::new(
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
            config.max_attempts,
        )?;
        let throttle = Throttle::try_new(config.bandwidth_bps)?;
        let counters = Arc::new(TransferCounters::default());

        let context = Arc::new(TransferContext {
            network: config.network,
            chunk_size: config.chunk_size,
            skip_policy: config.skip_policy,
            backoff,
            throttle: throttle.clone(),
            presigner,
            transport,
            counters: counters.clone(),
        });

        let queue = Arc::new(JobQueue::new());
        let controller = Arc::new(BatchController::new());
        let workers = WorkerPool::spawn(
            runtime.handle(),
            config.parallel,
            queue.clone(),
            controller.clone(),
            context,
        );

        tracing::info!(
            "engine ready: {} workers, bandwidth {}, network {}",
            config.parallel,
            describe_rate(config.bandwidth_bps),
            config.network
        );

        Ok(Self {
            layout: DatasetLayout::new(config.root.clone()),
            config,
            queue,
            controller,
            counters,
            throttle,
            workers,
            next_job: AtomicU64::new(0),
            runtime: Some(runtime),
        })
    }

    /// Pull every object listed in `<root>/meta/*.bin` into `<root>/data/`
    ///
    /// Opens a batch, enqueues one job per manifest record, closes intake and
    /// blocks until the batch drains.
    pub fn multi_download(&self, root: impl AsRef<Path>) -> Result<BatchReport> {
        let layout = DatasetLayout::new(root.as_ref());
        let scan = scan_manifests(&layout.meta_dir())?;
        layout.ensure_transfer_dirs()?;

        let batch = self.controller.open()?;
        tracing::info!(
            "batch {}: {} objects ({} bytes) from {} manifests under {}",
            batch,
            scan.len(),
            scan.total_bytes(),
            scan.files.len(),
            layout.root().display()
        );

        for entry in &scan.entries {
            self.submit(&layout, &entry.name, Direction::Pull, entry.size)?;
        }
        self.controller.close_intake()?;

        self.controller.wait()?.ok_or_else(|| {
            ShardlineError::ProtocolViolation(format!("batch {} was collected by another waiter", batch))
        })
    }

    /// Feed one payload of the push stream
    ///
    /// The two sentinels open and close a batch; any other non-empty payload
    /// becomes an upload job of the open batch. Names repeated within a batch
    /// are transferred once.
    pub fn push(&self, payload: &str) -> Result<()> {
        let name = payload.trim();
        match name {
            "" => {
                tracing::debug!("empty push payload ignored");
                Ok(())
            }
            START_SENTINEL => self.controller.open().map(|_| ()),
            END_SENTINEL => self.controller.close_intake().map(|_| ()),
            _ => self.submit(&self.layout, name, Direction::Push, None),
        }
    }

    /// Block until the current batch has no pending jobs
    ///
    /// Returns `None` when there is no batch to wait for.
    pub fn wait(&self) -> Result<Option<BatchReport>> {
        self.controller.wait()
    }

    /// Like [`Engine::wait`], failing with `WaitTimeout` after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<BatchReport>> {
        self.controller.wait_timeout(timeout)
    }

    /// Live counters for progress display
    pub fn counters(&self) -> Arc<TransferCounters> {
        self.counters.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn workers(&self) -> usize {
        self.workers.size()
    }

    fn submit(&self, layout: &DatasetLayout, name: &str, direction: Direction, size: Option<u64>) -> Result<()> {
        let batch = match self.controller.admit(name)? {
            Admission::Accepted(batch) => batch,
            Admission::Duplicate(_) => return Ok(()),
        };
        let id = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;

        match TransferJob::new(id, batch, name, direction, layout.clone(), size) {
            Ok(job) => {
                self.counters.add_required(1, size.unwrap_or(0));
                self.queue.push(job);
            }
            Err(e) => {
                // admitted jobs must still reach a terminal state
                tracing::error!("rejecting {} {}: {}", direction, name, e);
                let outcome = JobOutcome {
                    job: id,
                    name: name.to_string(),
                    direction,
                    status: OutcomeStatus::Failed,
                    attempts: 0,
                    bytes: size.unwrap_or(0),
                    error: Some(e.to_string()),
                };
                self.counters.add_required(1, size.unwrap_or(0));
                self.counters.record(&outcome);
                self.controller.complete(batch, outcome);
            }
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.queue.shutdown();
        self.workers.abort();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Pull a dataset with a default-configured engine
pub fn multi_download(
    root: impl AsRef<Path>,
    presign_endpoint: &str,
    network: Network,
    bandwidth_bps: u64,
    parallel: usize,
) -> Result<BatchReport> {
    let config = EngineConfig {
        root: root.as_ref().to_path_buf(),
        presign_endpoint: presign_endpoint.to_string(),
        network,
        bandwidth_bps,
        parallel,
        ..EngineConfig::default()
    };
    Engine::new(config)?.multi_download(root)
}

fn build_client(config: &EngineConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| ShardlineError::Config(format!("HTTP client: {}", e)))
}

fn build_runtime(config: &EngineConfig) -> Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("shardline-worker");
    if let Some(threads) = config.worker_threads {
        builder.worker_threads(threads.max(1));
    }
    Ok(builder.build()?)
}

fn describe_rate(bps: u64) -> String {
    if bps == 0 {
        "unlimited".to_string()
    } else {
        format!("{}/s", indicatif::HumanBytes(bps))
    }
}
