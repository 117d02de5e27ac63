/*!
 * Shardline - parallel, bandwidth-governed dataset transfer
 *
 * Moves large sets of objects between a local dataset tree and an object
 * store that is only reachable through presigned URLs:
 * - Manifest-driven bulk pulls (`.bin` manifests under `meta/` into `data/`)
 * - Sentinel-framed push batches
 * - One shared token-bucket throttle across all workers
 * - Range-part downloads with part reuse and atomic renames
 * - Bounded retries with exponential backoff
 *
 * ```no_run
 * use shardline::{Engine, EngineConfig};
 *
 * # fn main() -> shardline::Result<()> {
 * let config = EngineConfig {
 *     root: "/datasets/imagenet".into(),
 *     presign_endpoint: "http://sign.internal/presign".to_string(),
 *     ..EngineConfig::default()
 * };
 * let engine = Engine::new(config)?;
 * let report = engine.multi_download("/datasets/imagenet")?;
 * println!("{}", report);
 * # Ok(())
 * # }
 * ```
 */

pub mod cli_progress;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod stats;

// Re-export commonly used types
pub use config::{EngineConfig, LogLevel, Network, SkipPolicy};
pub use core::{Direction, JobOutcome, OutcomeStatus, Presigner, Transport};
pub use engine::{multi_download, Engine, END_SENTINEL, START_SENTINEL};
pub use error::{Result, ShardlineError};
pub use layout::DatasetLayout;
pub use stats::{BatchReport, TransferCounters};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
