//! Snapshot pool and kinematics publication.
//!
//! Every tick publishes a fresh kinematics value that other threads may be
//! reading (collision narrow phase, render snapshots). Allocating an `Arc`
//! per tick per body adds up at thousands of bodies, so buffers are
//! recycled:
//!
//! - [`SnapshotPool`] keeps uniquely owned `Arc<T>` buffers for reuse.
//! - [`KinematicsCell`] publishes the current `Arc<Kinematics>` and keeps a
//!   spare; a commit writes into the spare in place when no reader still
//!   holds it.

use crate::components::Kinematics;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Reuse counters for a [`SnapshotPool`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    /// Buffers freshly allocated (including preallocation).
    pub created: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
    /// Releases dropped because the buffer was shared or the pool was full.
    pub discarded: u64,
    /// Buffers currently waiting in the free list.
    pub available: usize,
}

/// Bounded free list of reusable `Arc<T>` buffers.
pub struct SnapshotPool<T> {
    free: Mutex<Vec<Arc<T>>>,
    capacity: usize,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Default> SnapshotPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take a buffer from the free list, or allocate one.
    pub fn acquire(&self) -> Arc<T> {
        if let Some(buf) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Arc::new(T::default())
    }

    /// Return a buffer. Only uniquely owned buffers are kept, reset to default.
    pub fn release(&self, mut buf: Arc<T>) {
        let Some(value) = Arc::get_mut(&mut buf) else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };
        *value = T::default();

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fill the free list up to `count` buffers (bounded by capacity).
    pub fn preallocate(&self, count: usize) {
        let mut free = self.free.lock();
        let target = count.min(self.capacity);
        while free.len() < target {
            free.push(Arc::new(T::default()));
            self.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Buffers currently available.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.free.lock().clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            available: self.len(),
        }
    }
}

/// Published kinematics of one body.
///
/// Only the body's owning thread commits; any thread may load.
pub struct KinematicsCell {
    current: RwLock<Arc<Kinematics>>,
    spare: Mutex<Option<Arc<Kinematics>>>,
}

impl KinematicsCell {
    /// Build a cell from two pooled buffers, publishing `initial`.
    pub fn new(initial: Kinematics, pool: &SnapshotPool<Kinematics>) -> Self {
        let mut current = pool.acquire();
        match Arc::get_mut(&mut current) {
            Some(slot) => *slot = initial,
            None => current = Arc::new(initial),
        }
        Self {
            current: RwLock::new(current),
            spare: Mutex::new(Some(pool.acquire())),
        }
    }

    /// Shared handle to the current snapshot.
    #[inline]
    pub fn load(&self) -> Arc<Kinematics> {
        Arc::clone(&self.current.read())
    }

    /// Copy of the current snapshot.
    #[inline]
    pub fn get(&self) -> Kinematics {
        **self.current.read()
    }

    /// Publish a new snapshot, reusing the spare buffer when possible.
    pub fn commit(&self, value: Kinematics, pool: &SnapshotPool<Kinematics>) {
        let mut next = self.spare.lock().take().unwrap_or_else(|| pool.acquire());
        match Arc::get_mut(&mut next) {
            Some(slot) => *slot = value,
            // A reader still holds the old spare; let it keep it.
            None => {
                next = pool.acquire();
                match Arc::get_mut(&mut next) {
                    Some(slot) => *slot = value,
                    None => next = Arc::new(value),
                }
            }
        }
        let previous = std::mem::replace(&mut *self.current.write(), next);
        *self.spare.lock() = Some(previous);
    }

    /// Hand both pooled buffers back. The last value stays readable through
    /// an unpooled copy for anyone still holding the body.
    pub fn release_into(&self, pool: &SnapshotPool<Kinematics>) {
        if let Some(spare) = self.spare.lock().take() {
            pool.release(spare);
        }
        let pooled = {
            let mut current = self.current.write();
            let last = **current;
            std::mem::replace(&mut *current, Arc::new(last))
        };
        pool.release(pooled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        let a = pool.acquire();
        assert_eq!(pool.stats().created, 1);
        pool.release(a);
        assert_eq!(pool.len(), 1);

        let _b = pool.acquire();
        assert_eq!(pool.stats().reused, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_release_resets_value() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        let mut a = pool.acquire();
        Arc::get_mut(&mut a).unwrap().pos_x = 42.0;
        pool.release(a);
        let b = pool.acquire();
        assert_eq!(b.pos_x, 0.0);
    }

    #[test]
    fn test_shared_buffers_are_discarded() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        let a = pool.acquire();
        let reader = Arc::clone(&a);
        pool.release(a);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.stats().discarded, 1);
        drop(reader);
    }

    #[test]
    fn test_preallocate_respects_capacity() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(4);
        pool.preallocate(10);
        assert_eq!(pool.len(), 4);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_cell_commit_swaps_without_allocating() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        pool.preallocate(2);
        let cell = KinematicsCell::new(Kinematics::at(0, 1.0, 2.0, 10.0), &pool);
        let created = pool.stats().created;

        for i in 0..100 {
            cell.commit(Kinematics::at(i, i as f64, 0.0, 10.0), &pool);
        }
        assert_eq!(cell.get().pos_x, 99.0);
        // Steady state ping-pongs between the two buffers
        assert_eq!(pool.stats().created, created);
    }

    #[test]
    fn test_cell_commit_with_reader_holding_old() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        let cell = KinematicsCell::new(Kinematics::at(0, 1.0, 0.0, 10.0), &pool);

        let held = cell.load();
        cell.commit(Kinematics::at(1, 2.0, 0.0, 10.0), &pool);
        // Spare is now `held`'s buffer, still shared
        cell.commit(Kinematics::at(2, 3.0, 0.0, 10.0), &pool);

        assert_eq!(held.pos_x, 1.0);
        assert_eq!(cell.get().pos_x, 3.0);
    }

    #[test]
    fn test_release_returns_both_buffers() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        pool.preallocate(2);
        let cell = KinematicsCell::new(Kinematics::at(0, 1.0, 0.0, 10.0), &pool);
        cell.commit(Kinematics::at(1, 7.0, 0.0, 10.0), &pool);
        assert!(pool.is_empty());

        cell.release_into(&pool);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().discarded, 0);
        assert_eq!(cell.get().pos_x, 7.0);

        // Churn does not grow the pool's allocations
        let created = pool.stats().created;
        for i in 0..10 {
            let cell = KinematicsCell::new(Kinematics::at(i, 0.0, 0.0, 1.0), &pool);
            cell.release_into(&pool);
        }
        assert_eq!(pool.stats().created, created);
    }

    #[test]
    fn test_release_with_reader_keeps_its_copy() {
        let pool: SnapshotPool<Kinematics> = SnapshotPool::new(8);
        let cell = KinematicsCell::new(Kinematics::at(0, 3.0, 0.0, 10.0), &pool);
        let held = cell.load();

        cell.release_into(&pool);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().discarded, 1);
        assert_eq!(held.pos_x, 3.0);
        assert_eq!(cell.get().pos_x, 3.0);
    }
}
