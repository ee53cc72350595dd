//! Bounded worker pool fed by a job queue.
//!
//! # Responsibilities
//! - Hand each queued job to exactly one worker
//! - Keep idle/total counters accurate on every worker exit, panics included
//! - Run the supervisor that applies the scaling rule
//!
//! # Design Decisions
//! - Workers share one receiver; whoever holds its lock waits for the next job
//! - The counter mutex is never held across an await
//! - A worker finishing a job exits instead of idling if that would push the
//!   idle count past `max_spare`

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::dispatch::scaling::{self, PoolCounters, ScalingBand, ScalingDecision};
use crate::observability::metrics;

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs one job to completion.
pub type Handler<T> = Arc<dyn Fn(T) -> JobFuture + Send + Sync>;

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub start_workers: usize,
    pub band: ScalingBand,
    pub queue_depth: usize,
    pub supervisor_interval: Duration,
}

impl From<&WorkerConfig> for PoolSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            start_workers: config.start_workers,
            band: ScalingBand::from(config),
            queue_depth: config.queue_depth,
            supervisor_interval: Duration::from_millis(config.supervisor_interval_ms),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    counters: PoolCounters,
    pending_retire: usize,
}

type SharedState = Arc<Mutex<PoolState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One worker's claim on the counters. Dropping it gives the claim back.
#[derive(Debug)]
struct WorkerSlot {
    state: SharedState,
    idle: bool,
}

impl WorkerSlot {
    /// Claim a new idle slot unless the pool is full.
    fn reserve(state: &SharedState, max_workers: usize) -> Option<Self> {
        let mut guard = lock(state);
        if guard.counters.total >= max_workers {
            return None;
        }
        guard.counters.total += 1;
        guard.counters.idle += 1;
        Some(Self {
            state: Arc::clone(state),
            idle: true,
        })
    }

    fn mark_busy(&mut self) {
        if self.idle {
            lock(&self.state).counters.idle -= 1;
            self.idle = false;
        }
    }

    /// Go back to idle unless that would exceed `max_spare`.
    fn mark_idle(&mut self, max_spare: usize) -> bool {
        let mut guard = lock(&self.state);
        if guard.counters.idle + 1 > max_spare {
            return false;
        }
        guard.counters.idle += 1;
        self.idle = true;
        true
    }

    fn take_retirement(&self) -> bool {
        let mut guard = lock(&self.state);
        if guard.pending_retire > 0 {
            guard.pending_retire -= 1;
            true
        } else {
            false
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let mut guard = lock(&self.state);
        guard.counters.total -= 1;
        if self.idle {
            guard.counters.idle -= 1;
        }
    }
}

struct Shared<T> {
    queue: tokio::sync::Mutex<mpsc::Receiver<T>>,
    state: SharedState,
    retire: Notify,
    handler: Handler<T>,
    band: ScalingBand,
}

/// Pool of workers pulling jobs from a bounded queue.
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
    sender: mpsc::Sender<T>,
    stop: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn the initial workers and the supervisor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(settings: PoolSettings, handler: Handler<T>) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_depth.max(1));
        let (stop, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            queue: tokio::sync::Mutex::new(receiver),
            state: SharedState::default(),
            retire: Notify::new(),
            handler,
            band: settings.band,
        });

        let spawned = spawn_workers(&shared, &stop.subscribe(), settings.start_workers);
        tracing::info!(
            workers = spawned,
            min_spare = settings.band.min_spare,
            max_spare = settings.band.max_spare,
            max_workers = settings.band.max_workers,
            "Worker pool started"
        );

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&shared),
            stop.subscribe(),
            settings.supervisor_interval,
        ));

        Self {
            shared,
            sender,
            stop,
            supervisor,
        }
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: T) -> Result<(), mpsc::error::SendError<T>> {
        self.sender.send(job).await
    }

    pub fn counters(&self) -> PoolCounters {
        lock(&self.shared.state).counters
    }

    /// Stop the supervisor, let workers finish their current job and wait up
    /// to `grace` for them to exit. Jobs still queued are dropped.
    ///
    /// Returns true if every worker exited in time.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let _ = self.stop.send(true);
        let _ = self.supervisor.await;
        drop(self.sender);

        let state = Arc::clone(&self.shared.state);
        let waiting = Arc::clone(&state);
        let drained = tokio::time::timeout(grace, async move {
            while lock(&waiting).counters.total > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        let remaining = lock(&state).counters.total;
        tracing::info!(remaining, "Worker pool stopped");
        drained
    }
}

fn spawn_workers<T: Send + 'static>(shared: &Arc<Shared<T>>, stop: &watch::Receiver<bool>, count: usize) -> usize {
    let mut spawned = 0;
    for _ in 0..count {
        let Some(slot) = WorkerSlot::reserve(&shared.state, shared.band.max_workers) else {
            break;
        };
        tokio::spawn(worker_loop(Arc::clone(shared), slot, stop.clone()));
        spawned += 1;
    }
    spawned
}

async fn worker_loop<T: Send + 'static>(shared: Arc<Shared<T>>, mut slot: WorkerSlot, mut stop: watch::Receiver<bool>) {
    loop {
        let job = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = shared.retire.notified() => {
                if slot.take_retirement() {
                    tracing::trace!("Worker retired");
                    break;
                }
                continue;
            }
            job = next_job(&shared.queue) => match job {
                Some(job) => job,
                None => break,
            },
        };

        slot.mark_busy();
        (shared.handler)(job).await;
        if !slot.mark_idle(shared.band.max_spare) {
            tracing::trace!("Worker exiting, spare band full");
            break;
        }
    }
}

/// Resolves once the pool is told to stop (or the pool is gone).
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn next_job<T>(queue: &tokio::sync::Mutex<mpsc::Receiver<T>>) -> Option<T> {
    queue.lock().await.recv().await
}

async fn supervise<T: Send + 'static>(shared: Arc<Shared<T>>, mut stop: watch::Receiver<bool>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        let counters = lock(&shared.state).counters;
        match scaling::evaluate(counters, &shared.band) {
            ScalingDecision::Spawn(n) => {
                let spawned = spawn_workers(&shared, &stop, n);
                tracing::debug!(spawned, idle = counters.idle, total = counters.total, "Topped up workers");
            }
            ScalingDecision::Retire(n) => {
                lock(&shared.state).pending_retire = n;
                shared.retire.notify_waiters();
                tracing::debug!(retiring = n, idle = counters.idle, "Retiring spare workers");
            }
            ScalingDecision::Hold => {}
        }

        let now = lock(&shared.state).counters;
        metrics::record_workers(now.idle, now.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(start: usize, min_spare: usize, max_spare: usize, max_workers: usize) -> PoolSettings {
        PoolSettings {
            start_workers: start,
            band: ScalingBand {
                min_spare,
                max_spare,
                max_workers,
            },
            queue_depth: 16,
            supervisor_interval: Duration::from_secs(3600),
        }
    }

    async fn wait_until(pool: &WorkerPool<u32>, check: impl Fn(PoolCounters) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(pool.counters()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("counters never converged: {:?}", pool.counters()));
    }

    fn recording_handler(tx: mpsc::UnboundedSender<u32>) -> Handler<u32> {
        Arc::new(move |job: u32| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(job);
            }) as JobFuture
        })
    }

    #[tokio::test]
    async fn initial_workers_are_idle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(settings(3, 1, 8, 8), recording_handler(tx));
        assert_eq!(pool.counters(), PoolCounters { idle: 3, total: 3 });
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn start_is_capped_by_max_workers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(settings(10, 1, 8, 4), recording_handler(tx));
        assert_eq!(pool.counters().total, 4);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn every_job_runs_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(settings(4, 1, 8, 8), recording_handler(tx));

        for job in 0..50 {
            pool.submit(job).await.unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 50 {
            seen.push(rx.recv().await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());

        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn panicking_job_returns_its_slot() {
        let handler: Handler<u32> = Arc::new(|_: u32| Box::pin(async { panic!("job failed") }) as JobFuture);
        let pool = WorkerPool::start(settings(2, 0, 8, 8), handler);

        pool.submit(1).await.unwrap();
        wait_until(&pool, |c| c.total == 1).await;
        assert_eq!(pool.counters(), PoolCounters { idle: 1, total: 1 });

        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn finished_worker_exits_when_spare_band_is_full() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(settings(3, 0, 2, 8), recording_handler(tx));

        pool.submit(7).await.unwrap();
        assert_eq!(rx.recv().await, Some(7));
        wait_until(&pool, |c| c.total == 2).await;
        assert_eq!(pool.counters().idle, 2);

        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn supervisor_tops_up_to_min_spare() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = settings(0, 3, 6, 8);
        config.supervisor_interval = Duration::from_millis(10);
        let pool = WorkerPool::start(config, recording_handler(tx));

        wait_until(&pool, |c| c.idle == 3 && c.total == 3).await;
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn supervisor_retires_excess_idle_workers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = settings(6, 1, 2, 8);
        config.supervisor_interval = Duration::from_millis(10);
        let pool = WorkerPool::start(config, recording_handler(tx));

        wait_until(&pool, |c| c.total == 2).await;
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_job() {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let handler: Handler<u32> = Arc::new(move |_: u32| {
            let done = Arc::clone(&done);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }) as JobFuture
        });
        let pool = WorkerPool::start(settings(1, 0, 4, 4), handler);

        pool.submit(1).await.unwrap();
        wait_until(&pool, |c| c.idle == 0).await;
        assert!(pool.shutdown(Duration::from_secs(2)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
