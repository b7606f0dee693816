//! # Queue Workers
//!
//! Consumers that lease jobs from the [`JobQueue`] and hand them to the
//! [`WriteCoordinator`]. A failed commit is retried with exponential backoff
//! until `max_attempts` deliveries have been made, after which the job is
//! moved to the queue's failure list.
//!
//! Delivery is at-least-once. A worker that dies mid-job simply lets its lease
//! run out, and since a commit is an upsert plus last-write-wins, running the
//! same job twice leaves the same stored value as running it once.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backends::JobQueue;
use crate::configs::WorkerConfig;
use crate::core::coordinator::WriteCoordinator;
use crate::error::QuoteResult;
use crate::model::{CommitOutcome, Job};

/// What happened to one delivered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Committed and acknowledged.
    Committed(CommitOutcome),
    /// The commit failed and the job will be delivered again after `delay`.
    Retrying {
        /// Delivery that just failed, starting at 1.
        attempt: u32,
        /// Backoff before the next delivery.
        delay: Duration,
    },
    /// The last allowed delivery failed and the job went to the failure list.
    Exhausted,
}

/// A set of worker loops sharing one queue and one coordinator.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    coordinator: WriteCoordinator,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Creates a pool. Nothing runs until [`WorkerPool::spawn`].
    pub fn new(queue: Arc<dyn JobQueue>, coordinator: WriteCoordinator, config: WorkerConfig) -> Self {
        Self {
            queue,
            coordinator,
            config,
        }
    }

    /// Leases and handles the next visible job. `None` when the queue is idle.
    pub async fn process_one(&self) -> QuoteResult<Option<JobOutcome>> {
        match self.queue.reserve(self.config.visibility_timeout).await? {
            Some(job) => self.handle(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Commits a leased job and settles it on the queue.
    pub async fn handle(&self, job: Job) -> QuoteResult<JobOutcome> {
        match self.coordinator.commit(&job.key, &job.value).await {
            Ok(outcome) => {
                self.queue.ack(&job).await?;
                Ok(JobOutcome::Committed(outcome))
            }
            Err(e) if job.attempts >= self.config.max_attempts => {
                error!(
                    "Job {} ({} = {}) failed after {} attempts: {}",
                    job.id, job.key, job.value, job.attempts, e
                );
                self.queue.fail(&job, &e.to_string()).await?;
                Ok(JobOutcome::Exhausted)
            }
            Err(e) => {
                let delay = self.config.backoff(job.attempts);
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.id, job.attempts, self.config.max_attempts, delay, e
                );
                self.queue.retry_later(&job, delay).await?;
                Ok(JobOutcome::Retrying {
                    attempt: job.attempts,
                    delay,
                })
            }
        }
    }

    /// Starts `concurrency` worker loops that stop once `cancel` fires. A job
    /// already in progress is finished first.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting {} queue workers", self.config.concurrency);
        (0..self.config.concurrency)
            .map(|n| tokio::spawn(Arc::clone(&self).run(n, cancel.clone())))
            .collect()
    }

    async fn run(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let idle = match self.process_one().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    warn!("Worker {}: queue error: {}", worker, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_poll) => {}
                }
            }
        }
        info!("Worker {} stopped", worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::faults::FlakyStore;
    use crate::backends::memory::{MemoryBus, MemoryCache, MemoryQueue, MemoryStore};
    use crate::backends::DurableStore;
    use crate::configs::CacheConfig;

    fn pool_over(store: Arc<dyn DurableStore>, config: WorkerConfig) -> (WorkerPool, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        let coordinator = WriteCoordinator::new(
            store,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryBus::new()),
            CacheConfig::default(),
        );
        (WorkerPool::new(queue.clone(), coordinator, config), queue)
    }

    #[tokio::test]
    async fn committed_jobs_are_acknowledged() {
        let store = Arc::new(MemoryStore::new());
        let (pool, queue) = pool_over(store.clone(), WorkerConfig::default());
        queue.enqueue("Gold", "1950").await.unwrap();

        assert_eq!(
            pool.process_one().await.unwrap(),
            Some(JobOutcome::Committed(CommitOutcome::Created))
        );
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(store.find("Gold").await.unwrap().as_deref(), Some("1950"));
        assert_eq!(pool.process_one().await.unwrap(), None);
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (pool, queue) = pool_over(store.clone(), WorkerConfig::default());
        let mut job = queue.enqueue("Gold", "1950").await.unwrap();
        job.attempts = 1;

        pool.handle(job.clone()).await.unwrap();
        pool.handle(job).await.unwrap();

        assert_eq!(store.all().await.unwrap().len(), 1);
        assert_eq!(store.find("Gold").await.unwrap().as_deref(), Some("1950"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commits_back_off_exponentially() {
        let store = Arc::new(FlakyStore::failing_upserts(2));
        let (pool, queue) = pool_over(store.clone(), WorkerConfig::default());
        queue.enqueue("Gold", "1950").await.unwrap();

        assert_eq!(
            pool.process_one().await.unwrap(),
            Some(JobOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(1)
            })
        );
        assert_eq!(pool.process_one().await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            pool.process_one().await.unwrap(),
            Some(JobOutcome::Retrying {
                attempt: 2,
                delay: Duration::from_secs(2)
            })
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            pool.process_one().await.unwrap(),
            Some(JobOutcome::Committed(CommitOutcome::Created))
        );
        assert_eq!(store.inner.find("Gold").await.unwrap().as_deref(), Some("1950"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_jobs_land_on_the_failure_list() {
        let config = WorkerConfig {
            max_attempts: 2,
            ..WorkerConfig::default()
        };
        let (pool, queue) = pool_over(Arc::new(FlakyStore::broken()), config);
        let job = queue.enqueue("Gold", "1950").await.unwrap();

        pool.process_one().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.process_one().await.unwrap(), Some(JobOutcome::Exhausted));

        let failed = queue.failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.id, job.id);
        assert_eq!(failed[0].job.attempts, 2);
        assert!(failed[0].reason.contains("durable store failure"));
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_workers_drain_the_queue_and_stop() {
        let store = Arc::new(MemoryStore::new());
        let config = WorkerConfig {
            idle_poll: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let (pool, queue) = pool_over(store.clone(), config);
        for (key, value) in [("Gold", "1950"), ("Silver", "24"), ("Copper", "4")] {
            queue.enqueue(key, value).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let handles = Arc::new(pool).spawn(cancel.clone());
        assert_eq!(handles.len(), 4);

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.pending().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.all().await.unwrap().len(), 3);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
