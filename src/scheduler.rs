//! Batch scheduler: a fixed worker pool driving fixed-capacity body batches.
//!
//! Bodies are grouped into [`Batch`]es. One batch pass ticks every live
//! member in list order, prunes the dead, sleeps briefly and re-submits
//! itself to the pool. Because a pass is only ever queued or running in
//! one place, each body has exactly one writer thread at a time.
//!
//! ## Batch sizing
//! - Players get a batch of their own (`player_batch_size`, normally 1) so
//!   input latency depends only on their own tick.
//! - Everything else shares batches of `batch_size` (normally 10).
//!
//! ## Modes
//! - `Threaded`: passes run continuously on a `rayon::ThreadPool`.
//! - `Manual`: batches are only registered; the host calls
//!   [`BatchScheduler::run_pass`] to tick everything on its own thread.

use crate::body::Body;
use crate::components::BodyCategory;
use crate::config::{SchedulerMode, SimConfig};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Something that can advance one body by one tick.
pub trait BodyTicker: Send + Sync {
    fn tick(&self, body: &Arc<Body>);
}

// ============================================================================
// BATCH
// ============================================================================

/// Fixed-capacity group of bodies ticked sequentially.
pub struct Batch {
    id: u64,
    capacity: usize,
    members: Mutex<Vec<Arc<Body>>>,
    /// Pass-local copy of `members`, so ticks can assign new bodies
    /// (possibly into this batch) without deadlocking.
    work: Mutex<Vec<Arc<Body>>>,
    accepting: AtomicBool,
    terminated: AtomicBool,
    stop: AtomicBool,
    passes: AtomicU64,
}

impl Batch {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            members: Mutex::new(Vec::with_capacity(capacity)),
            work: Mutex::new(Vec::with_capacity(capacity)),
            accepting: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Add `body` if this batch is open, of the right size and has room.
    fn try_admit(&self, capacity: usize, body: &Arc<Body>) -> bool {
        if self.capacity != capacity
            || !self.accepting.load(Ordering::Acquire)
            || self.is_terminated()
        {
            return false;
        }
        let mut members = self.members.lock();
        if members.len() >= self.capacity {
            return false;
        }
        members.push(Arc::clone(body));
        true
    }

    /// Tick every live member once, then drop the dead ones.
    fn run_pass(&self, ticker: &dyn BodyTicker) {
        let mut work = self.work.lock();
        work.clear();
        work.extend(self.members.lock().iter().cloned());

        for body in work.iter() {
            if !body.is_dead() {
                ticker.tick(body);
            }
        }
        work.clear();

        self.members.lock().retain(|b| !b.is_dead());
        self.passes.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Batch counts and occupancy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub batches: usize,
    /// Batch capacity -> number of batches with that capacity.
    pub batches_by_capacity: BTreeMap<usize, usize>,
    pub bodies: usize,
    pub worker_threads: usize,
}

/// Outcome of [`BatchScheduler::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Batches that exited on their own.
    pub stopped: usize,
    /// Batches still registered at the timeout and marked terminated.
    pub forced: usize,
}

struct Shared {
    registry: Mutex<Vec<Arc<Batch>>>,
    drained: Condvar,
    ticker: Weak<dyn BodyTicker>,
    sleep: Duration,
}

impl Shared {
    /// Final step of a batch's life: close it and drop it from the registry.
    fn retire(&self, batch: &Arc<Batch>) {
        batch.accepting.store(false, Ordering::Release);
        batch.terminated.store(true, Ordering::Release);

        let mut registry = self.registry.lock();
        registry.retain(|b| !Arc::ptr_eq(b, batch));
        debug!(batch = batch.id, remaining = registry.len(), "batch retired");
        if registry.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// Assigns bodies to batches and drives the batches.
pub struct BatchScheduler {
    mode: SchedulerMode,
    batch_size: usize,
    player_batch_size: usize,
    shutdown_timeout: Duration,
    worker_threads: usize,
    shared: Arc<Shared>,
    pool: Mutex<Option<Arc<ThreadPool>>>,
    next_batch: AtomicU64,
    stopping: AtomicBool,
}

impl BatchScheduler {
    /// Build the scheduler. In threaded mode this starts the worker pool.
    pub fn new(config: &SimConfig, ticker: Weak<dyn BodyTicker>) -> Result<Self> {
        let pool = Self::build_pool(config)?;
        Ok(Self::with_pool(config, ticker, pool))
    }

    /// Worker pool for `config`, or `None` in manual mode.
    pub fn build_pool(config: &SimConfig) -> Result<Option<ThreadPool>> {
        match config.scheduler_mode {
            SchedulerMode::Manual => Ok(None),
            SchedulerMode::Threaded => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(config.effective_worker_threads())
                    .thread_name(|i| format!("orbit-batch-{i}"))
                    .panic_handler(|_| error!("batch task panicked"))
                    .build()?;
                Ok(Some(pool))
            }
        }
    }

    /// Build the scheduler around an already built pool.
    pub fn with_pool(config: &SimConfig, ticker: Weak<dyn BodyTicker>, pool: Option<ThreadPool>) -> Self {
        let worker_threads = pool.as_ref().map_or(0, ThreadPool::current_num_threads);
        Self {
            mode: config.scheduler_mode,
            batch_size: config.batch_size,
            player_batch_size: config.player_batch_size,
            shutdown_timeout: config.shutdown_timeout(),
            worker_threads,
            shared: Arc::new(Shared {
                registry: Mutex::new(Vec::new()),
                drained: Condvar::new(),
                ticker,
                sleep: config.runner_sleep(),
            }),
            pool: Mutex::new(pool.map(Arc::new)),
            next_batch: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    fn capacity_for(&self, body: &Body) -> usize {
        match body.category() {
            BodyCategory::Player => self.player_batch_size,
            _ => self.batch_size,
        }
    }

    /// Put `body` into a batch, opening a new one if none has room.
    ///
    /// Returns false once shutdown has begun.
    pub fn assign(&self, body: &Arc<Body>) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            return false;
        }
        let capacity = self.capacity_for(body);

        let mut registry = self.shared.registry.lock();
        if registry.iter().any(|batch| batch.try_admit(capacity, body)) {
            return true;
        }

        let batch = Arc::new(Batch::new(self.next_batch.fetch_add(1, Ordering::Relaxed), capacity));
        batch.try_admit(capacity, body);
        registry.push(Arc::clone(&batch));
        drop(registry);

        debug!(batch = batch.id, capacity, body = %body.id(), "batch opened");
        if let Some(pool) = self.pool.lock().as_ref() {
            submit(&self.shared, pool, batch);
        }
        true
    }

    /// Tick every batch once on the calling thread, in creation order.
    ///
    /// This is how manual mode advances; in threaded mode it is a no-op.
    pub fn run_pass(&self) {
        if self.mode != SchedulerMode::Manual {
            return;
        }
        let Some(ticker) = self.shared.ticker.upgrade() else {
            return;
        };
        let batches: Vec<Arc<Batch>> = self.shared.registry.lock().clone();
        for batch in &batches {
            if batch.stop_requested() {
                self.shared.retire(batch);
            } else {
                batch.run_pass(&*ticker);
            }
        }
    }

    pub fn batch_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn batch_count_with_capacity(&self, capacity: usize) -> usize {
        self.shared
            .registry
            .lock()
            .iter()
            .filter(|b| b.capacity == capacity)
            .count()
    }

    pub fn stats(&self) -> SchedulerStats {
        let registry = self.shared.registry.lock();
        let mut stats = SchedulerStats {
            batches: registry.len(),
            worker_threads: self.worker_threads,
            ..Default::default()
        };
        for batch in registry.iter() {
            *stats.batches_by_capacity.entry(batch.capacity).or_default() += 1;
            stats.bodies += batch.len();
        }
        stats
    }

    /// Stop every batch and wait for them to exit.
    ///
    /// Batches finish their in-flight pass. Anything still registered after
    /// `shutdown_timeout` is marked terminated and abandoned, and the pool
    /// is dropped.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        let batches: Vec<Arc<Batch>> = self.shared.registry.lock().clone();
        let total = batches.len();
        for batch in &batches {
            batch.accepting.store(false, Ordering::Release);
            batch.request_stop();
        }

        if self.mode == SchedulerMode::Manual {
            for batch in &batches {
                self.shared.retire(batch);
            }
        } else {
            let deadline = Instant::now() + self.shutdown_timeout;
            let mut registry = self.shared.registry.lock();
            while !registry.is_empty() {
                if self.shared.drained.wait_until(&mut registry, deadline).timed_out() {
                    break;
                }
            }
        }

        let forced = {
            let mut registry = self.shared.registry.lock();
            let forced = registry.len();
            for batch in registry.drain(..) {
                batch.terminated.store(true, Ordering::Release);
            }
            forced
        };
        if forced > 0 {
            warn!(forced, "batches did not stop in time; abandoning them");
        }

        self.pool.lock().take();
        info!(stopped = total - forced, forced, "scheduler shut down");
        ShutdownReport {
            stopped: total - forced,
            forced,
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        // Running passes see the stop flag and retire on their own
        for batch in self.shared.registry.lock().iter() {
            batch.request_stop();
        }
    }
}

fn submit(shared: &Arc<Shared>, pool: &Arc<ThreadPool>, batch: Arc<Batch>) {
    let shared = Arc::clone(shared);
    let weak_pool = Arc::downgrade(pool);
    pool.spawn_fifo(move || run_batch(shared, weak_pool, batch));
}

/// One pass of a batch, then re-submit unless stopped.
fn run_batch(shared: Arc<Shared>, pool: Weak<ThreadPool>, batch: Arc<Batch>) {
    if batch.stop_requested() {
        shared.retire(&batch);
        return;
    }
    let Some(ticker) = shared.ticker.upgrade() else {
        shared.retire(&batch);
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| batch.run_pass(&*ticker))).is_err() {
        error!(batch = batch.id, "batch pass panicked; continuing");
    }
    drop(ticker);

    thread::sleep(shared.sleep);

    if batch.stop_requested() {
        shared.retire(&batch);
        return;
    }
    match pool.upgrade() {
        Some(pool) => submit(&shared, &pool, batch),
        None => shared.retire(&batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyPayload, BodySpec};
    use crate::components::{BodyId, Kinematics};
    use crate::pool::SnapshotPool;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTicker {
        ticks: AtomicUsize,
        order: Mutex<Vec<BodyId>>,
    }

    impl BodyTicker for CountingTicker {
        fn tick(&self, body: &Arc<Body>) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(body.id());
        }
    }

    fn make_body(id: u64, category: BodyCategory) -> Arc<Body> {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(4);
        let spec = BodySpec::new(category, 1.0, 1.0, 1.0);
        let body = Arc::new(Body::new(BodyId(id), &spec, 0, BodyPayload::Plain, &pool));
        body.activate();
        body
    }

    fn scheduler(mode: SchedulerMode, ticker: &Arc<CountingTicker>) -> BatchScheduler {
        let mut config = SimConfig::default();
        config.scheduler_mode = mode;
        config.worker_threads = 2;
        config.runner_sleep_ms = 1;
        config.shutdown_timeout_ms = 2_000;
        let weak: Weak<dyn BodyTicker> = Arc::downgrade(ticker) as Weak<dyn BodyTicker>;
        BatchScheduler::new(&config, weak).unwrap()
    }

    #[test]
    fn test_players_get_their_own_batches() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Manual, &ticker);
        for i in 0..5 {
            assert!(sched.assign(&make_body(i, BodyCategory::Player)));
        }
        assert_eq!(sched.batch_count(), 5);
        assert_eq!(sched.batch_count_with_capacity(1), 5);
    }

    #[test]
    fn test_others_share_batches_of_ten() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Manual, &ticker);
        for i in 0..23 {
            let category = if i % 2 == 0 { BodyCategory::Dynamic } else { BodyCategory::Projectile };
            sched.assign(&make_body(i, category));
        }
        // ceil(23 / 10)
        assert_eq!(sched.batch_count(), 3);
        let stats = sched.stats();
        assert_eq!(stats.bodies, 23);
        assert_eq!(stats.batches_by_capacity.get(&10), Some(&3));
    }

    #[test]
    fn test_manual_pass_ticks_in_list_order_and_prunes_dead() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Manual, &ticker);
        let bodies: Vec<_> = (0..4).map(|i| make_body(i, BodyCategory::Dynamic)).collect();
        for b in &bodies {
            sched.assign(b);
        }

        sched.run_pass();
        assert_eq!(*ticker.order.lock(), vec![BodyId(0), BodyId(1), BodyId(2), BodyId(3)]);

        bodies[1].die();
        sched.run_pass();
        assert_eq!(ticker.ticks.load(Ordering::SeqCst), 7);
        assert_eq!(sched.stats().bodies, 3);
    }

    #[test]
    fn test_pruned_slot_is_reused() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Manual, &ticker);
        let bodies: Vec<_> = (0..10).map(|i| make_body(i, BodyCategory::Dynamic)).collect();
        for b in &bodies {
            sched.assign(b);
        }
        bodies[0].die();
        sched.run_pass();

        sched.assign(&make_body(99, BodyCategory::Dynamic));
        assert_eq!(sched.batch_count(), 1);
    }

    #[test]
    fn test_manual_shutdown_retires_everything() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Manual, &ticker);
        for i in 0..12 {
            sched.assign(&make_body(i, BodyCategory::Dynamic));
        }
        let report = sched.shutdown();
        assert_eq!(report, ShutdownReport { stopped: 2, forced: 0 });
        assert_eq!(sched.batch_count(), 0);
        assert!(!sched.assign(&make_body(50, BodyCategory::Dynamic)));
    }

    #[test]
    fn test_threaded_batches_tick_and_stop() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Threaded, &ticker);
        for i in 0..15 {
            sched.assign(&make_body(i, BodyCategory::Dynamic));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticker.ticks.load(Ordering::SeqCst) < 150 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticker.ticks.load(Ordering::SeqCst) >= 150);

        let report = sched.shutdown();
        assert_eq!(report.forced, 0);
        assert_eq!(report.stopped, 2);
        assert_eq!(sched.batch_count(), 0);

        // Nothing ticks after shutdown returns
        let after = ticker.ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticker.ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_threaded_batches_stop_when_ticker_is_gone() {
        let ticker = Arc::new(CountingTicker::default());
        let sched = scheduler(SchedulerMode::Threaded, &ticker);
        sched.assign(&make_body(1, BodyCategory::Dynamic));
        drop(ticker);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sched.batch_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sched.batch_count(), 0);
    }
}
