/*!
 * Shared job queue feeding the worker pool
 *
 * Many producers (manifest scan, `push`) and many consumers (workers). Each
 * job is handed to exactly one consumer.
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use super::job::TransferJob;

#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<TransferJob>>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake one idle worker
    pub fn push(&self, job: TransferJob) {
        self.lock().push_back(job);
        self.notify.notify_one();
    }

    /// Take the next job, waiting while the queue is empty
    ///
    /// Returns `None` once the queue has been shut down.
    pub async fn pop(&self) -> Option<TransferJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not lost.
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.lock().pop_front() {
                return Some(job);
            }

            notified.await;
        }
    }

    /// Take a job without waiting
    pub fn try_pop(&self) -> Option<TransferJob> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop handing out jobs and release every waiting worker
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TransferJob>> {
        // a panicking holder cannot leave the deque half-updated
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::Direction;
    use crate::layout::DatasetLayout;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(id: u64) -> TransferJob {
        TransferJob::new(id, 1, format!("obj-{}", id), Direction::Pull, DatasetLayout::new("/ds"), None).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new();
        queue.push(job(1));
        queue.push(job(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.unwrap().id, 1);
        assert_eq!(queue.pop().await.unwrap().id, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(job(9));

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue = Arc::new(JobQueue::new());
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            waiters.push(tokio::spawn(async move { queue.pop().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        for waiter in waiters {
            let got = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(got.is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_job_claimed_once() {
        let queue = Arc::new(JobQueue::new());
        let consumers: Vec<_> = (0..32)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(job) = queue.pop().await {
                        seen.push(job.id);
                    }
                    seen
                })
            })
            .collect();

        for id in 0..500 {
            queue.push(job(id));
        }
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.shutdown();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 500);
        assert_eq!(unique.len(), 500);
    }
}
