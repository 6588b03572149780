//! Periodic sweep for due scheduled posts.

use castline_config::SweeperConfig;
use castline_db::{ClaimMode, PostRepo};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{ClaimError, ClaimOutcome, JobOutcome, JobRunner, PostClaimer, SweepError};

/// Used when a zero interval or timeout reaches the sweeper.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);
const FALLBACK_SWEEP_TIMEOUT: Duration = Duration::from_secs(20);

/// Polls for due posts, claims them and hands the work to the runner.
pub struct ScheduledSweeper {
    posts: Arc<dyn PostRepo>,
    claimer: Arc<PostClaimer>,
    runner: Arc<JobRunner>,
    config: SweeperConfig,
    /// Current discovery batch size. Only ever lowered.
    limit: AtomicI64,
    sweeps: AtomicU64,
}

impl ScheduledSweeper {
    pub fn new(
        posts: Arc<dyn PostRepo>,
        claimer: Arc<PostClaimer>,
        runner: Arc<JobRunner>,
        mut config: SweeperConfig,
    ) -> Self {
        if config.interval.is_zero() {
            warn!(fallback = ?FALLBACK_INTERVAL, "Sweep interval must be non-zero; using fallback");
            config.interval = FALLBACK_INTERVAL;
        }
        if config.sweep_timeout.is_zero() {
            warn!(fallback = ?FALLBACK_SWEEP_TIMEOUT, "Sweep timeout must be non-zero; using fallback");
            config.sweep_timeout = FALLBACK_SWEEP_TIMEOUT;
        }
        let limit = config.batch_limit.max(1);
        Self {
            posts,
            claimer,
            runner,
            config,
            limit: AtomicI64::new(limit),
            sweeps: AtomicU64::new(0),
        }
    }

    pub fn batch_limit(&self) -> i64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Sweep immediately, then on every interval until `shutdown` turns true
    /// or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.config.interval,
            limit = self.batch_limit(),
            origin = %self.claimer.origin(),
            "Scheduled post sweeper started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut shutdown).await;
                }
                _ = stop_requested(&mut shutdown) => break,
            }
        }
        info!("Scheduled post sweeper stopped");
    }

    /// One tick: sweep, retrying with backoff on failure. Returns how many jobs were enqueued.
    pub async fn tick(&self, shutdown: &mut watch::Receiver<bool>) -> usize {
        let sweep_number = self.sweeps.fetch_add(1, Ordering::Relaxed) + 1;
        let attempts = self.config.backoff.len() + 1;

        for attempt in 0..attempts {
            let err = match self.sweep_once().await {
                Ok(handles) => {
                    let enqueued = handles.len();
                    if enqueued > 0 {
                        info!(enqueued, "Sweep enqueued publish jobs");
                    } else {
                        self.report_idle(sweep_number).await;
                    }
                    return enqueued;
                }
                Err(e) => e,
            };

            if err.is_resource_exhausted() {
                let previous = self.limit.swap(1, Ordering::Relaxed);
                if previous > 1 {
                    warn!(previous, limit = 1, "Store is out of resources; lowering sweep batch size");
                }
            }

            let Some(delay) = self.config.backoff.get(attempt).copied() else {
                error!(limit = self.batch_limit(), error = %err, "Sweep failed; giving up until next tick");
                return 0;
            };
            warn!(
                attempt = attempt + 1,
                attempts,
                limit = self.batch_limit(),
                error = %err,
                "Sweep failed; retrying"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop_requested(shutdown) => return 0,
            }
        }
        0
    }

    /// One sweep attempt: discover due posts and claim each of them.
    ///
    /// The sweep stops claiming once its time budget is spent; claims already
    /// started are always carried through.
    pub async fn sweep_once(&self) -> Result<Vec<JoinHandle<JobOutcome>>, SweepError> {
        let budget = self.config.sweep_timeout;
        let deadline = Instant::now() + budget;
        let limit = self.batch_limit();

        let candidates = timeout(budget, self.posts.find_due(limit))
            .await
            .map_err(|_| SweepError::TimedOut(budget))??;
        debug!(candidates = candidates.len(), limit, "Found due posts");

        let mut handles = Vec::new();
        for candidate in candidates {
            if Instant::now() >= deadline {
                warn!(remaining_from = %candidate.id, "Sweep time budget spent; deferring the rest");
                break;
            }

            match self
                .claimer
                .claim_and_enqueue(&candidate.id, &candidate.user_id, ClaimMode::Due)
                .await
            {
                Ok(ClaimOutcome::Enqueued(task)) => handles.push(self.runner.spawn(task)),
                Ok(ClaimOutcome::NotClaimed) => {
                    debug!(post_id = %candidate.id, user_id = %candidate.user_id, "Post already claimed");
                }
                Ok(ClaimOutcome::Rejected(_)) => {}
                Err(ClaimError::Claim(e)) => {
                    warn!(post_id = %candidate.id, error = %e, "Claim failed");
                }
                Err(e) => {
                    warn!(post_id = %candidate.id, error = %e, "Failed to enqueue claimed post");
                }
            }
        }
        Ok(handles)
    }

    async fn report_idle(&self, sweep_number: u64) {
        let every = self.config.idle_report_every.max(1);
        if sweep_number % every != 0 {
            return;
        }
        match self.posts.due_stats().await {
            Ok(stats) => info!(
                enqueued = 0,
                due = stats.due,
                next = stats
                    .next_scheduled_for
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                "Sweep idle"
            ),
            Err(e) => debug!(error = %e, "Failed to read due stats"),
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RealtimeHub;
    use castline_core::JobStatus;
    use castline_db::{MemoryStore, PostRow};
    use castline_providers::ProviderRegistry;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use url::Url;

    fn sweeper(store: &Arc<MemoryStore>, config: SweeperConfig) -> ScheduledSweeper {
        let hub = Arc::new(RealtimeHub::new());
        let claimer = Arc::new(PostClaimer::new(
            store.clone(),
            store.clone(),
            hub.clone(),
            Url::parse("https://app.example.com").unwrap(),
        ));
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            store.clone(),
            ProviderRegistry::dry_run(),
            hub,
            4,
        ));
        ScheduledSweeper::new(store.clone(), claimer, runner, config)
    }

    fn due(id: &str, minutes_ago: i64) -> PostRow {
        PostRow::scheduled(
            id,
            "u1",
            "hello",
            &["facebook"],
            &[],
            Utc::now() - ChronoDuration::minutes(minutes_ago),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_due_post_is_published() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(due("p1", 1));
        let sweeper = sweeper(&store, SweeperConfig::default());

        let handles = sweeper.sweep_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(store.job_count(), 1);

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert_eq!(outcomes[0].status, JobStatus::Completed);
        assert_eq!(outcomes[0].post_id.as_deref(), Some("p1"));

        let post = store.post("p1").unwrap();
        assert_eq!(post.status, "published");
        assert!(post.published_at.is_some());
        let job = store.job(outcomes[0].job_id.as_str()).unwrap();
        assert_eq!(job.status, "completed");
    }

    #[tokio::test]
    async fn test_resweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(due("p1", 2));
        store.insert_post(due("p2", 1));
        let sweeper = sweeper(&store, SweeperConfig::default());

        assert_eq!(sweeper.sweep_once().await.unwrap().len(), 2);
        assert!(sweeper.sweep_once().await.unwrap().is_empty());
        assert_eq!(store.job_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sweepers_claim_once() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            store.insert_post(due(&format!("p{i}"), 1));
        }
        let a = sweeper(&store, SweeperConfig::default());
        let b = sweeper(&store, SweeperConfig::default());

        let (ra, rb) = tokio::join!(a.sweep_once(), b.sweep_once());
        assert_eq!(ra.unwrap().len() + rb.unwrap().len(), 10);
        assert_eq!(store.job_count(), 10);
    }

    #[tokio::test]
    async fn test_batch_limit_respected() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store.insert_post(due(&format!("p{i}"), 1));
        }
        let config = SweeperConfig {
            batch_limit: 2,
            ..SweeperConfig::default()
        };
        let sweeper = sweeper(&store, config);
        assert_eq!(sweeper.sweep_once().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_post_does_not_stop_sweep() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(PostRow::scheduled(
            "blank",
            "u1",
            " ",
            &["facebook"],
            &[],
            Utc::now() - ChronoDuration::minutes(5),
        ));
        store.insert_post(due("good", 1));
        let sweeper = sweeper(&store, SweeperConfig::default());

        let handles = sweeper.sweep_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(
            store.post("blank").unwrap().last_publish_error.as_deref(),
            Some("empty_content")
        );
        // Terminal: never picked up again
        assert!(sweeper.sweep_once().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_exhaustion_lowers_limit_and_retries() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(due("p1", 1));
        store.exhaust_next_discoveries(2);
        let sweeper = sweeper(&store, SweeperConfig::default());
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        assert_eq!(sweeper.tick(&mut rx).await, 1);
        assert_eq!(sweeper.batch_limit(), 1);
        assert_eq!(store.discovery_limits(), vec![25, 1, 1]);
        // Two backoff sleeps: 700ms + 1500ms
        assert!(started.elapsed() >= Duration::from_millis(2200));

        // The reduction is permanent
        sweeper.tick(&mut rx).await;
        assert_eq!(store.discovery_limits().last(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_gives_up_after_backoff() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(due("p1", 1));
        store.exhaust_next_discoveries(10);
        let sweeper = sweeper(&store, SweeperConfig::default());
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(sweeper.tick(&mut rx).await, 0);
        // One attempt plus three retries
        assert_eq!(store.discovery_limits().len(), 4);
        assert_eq!(store.post("p1").unwrap().last_publish_job_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let store = Arc::new(MemoryStore::new());
        store.exhaust_next_discoveries(10);
        let sweeper = sweeper(&store, SweeperConfig::default());
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert_eq!(sweeper.tick(&mut rx).await, 0);
        assert_eq!(store.discovery_limits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_immediately_and_stops() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(due("p1", 1));
        let sweeper = Arc::new(sweeper(&store, SweeperConfig::default()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run(rx).await })
        };
        // Let the first tick run
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.discovery_limits().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.discovery_limits().len(), 2);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_falls_back() {
        let store = Arc::new(MemoryStore::new());
        let config = SweeperConfig {
            interval: Duration::ZERO,
            sweep_timeout: Duration::ZERO,
            ..SweeperConfig::default()
        };
        let sweeper = Arc::new(sweeper(&store, config));
        let (tx, rx) = watch::channel(false);

        let task = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.discovery_limits().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.discovery_limits().len(), 2);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_run() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper(&store, SweeperConfig::default());
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), sweeper.run(rx))
            .await
            .unwrap();
    }
}
