/*!
 * Core transfer machinery - jobs, queue, batches, presign, transport, workers
 */

pub mod batch;
pub mod job;
pub mod presign;
pub mod queue;
pub mod transfer;
pub mod transport;
pub mod worker;

pub use batch::{Admission, BatchController, BatchState};
pub use job::{BatchId, Direction, JobOutcome, JobState, OutcomeStatus, TransferJob};
pub use presign::{HttpPresigner, Presigner};
pub use queue::JobQueue;
pub use transfer::TransferContext;
pub use transport::{ByteRange, HttpTransport, Transport};
pub use worker::WorkerPool;
