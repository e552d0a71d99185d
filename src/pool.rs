//! Fixed-capacity connection-record pool (§4.2, §9 "Intrusive free lists").
//!
//! The original server threads a free list through the connection records
//! themselves via raw pointers. Rust's aliasing rules rule that out, so —
//! per the spec's own re-architecture decision — the free list is a stack of
//! `usize` indices, and slot ownership is handed out as an owned mutex guard
//! so a acquired slot can be moved into a spawned connection task without
//! fighting a borrow on the pool itself.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::{ReqLimits, RespLimits};
use crate::server::connection::HttpConnection;

pub(crate) struct ConnPool {
    slots: Vec<Arc<Mutex<HttpConnection>>>,
    free: Arc<ArrayQueue<usize>>,
}

impl ConnPool {
    pub(crate) fn new(capacity: usize, req_limits: &ReqLimits, resp_limits: &RespLimits) -> Self {
        let capacity = capacity.max(1);
        let free = Arc::new(ArrayQueue::new(capacity));
        let mut slots = Vec::with_capacity(capacity);

        for index in 0..capacity {
            slots.push(Arc::new(Mutex::new(HttpConnection::new(req_limits, resp_limits))));
            free.push(index).expect("free list sized to capacity");
        }

        Self { slots, free }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Pops a free slot index and locks it. The index's uniqueness (it only
    /// ever lives in the free list or with exactly one acquirer) is what
    /// justifies holding the returned guard across the connection's entire
    /// lifetime, many `.await` points included, without it ever becoming a
    /// point of contention with another task.
    pub(crate) async fn try_acquire(&self) -> Option<PoolGuard> {
        let index = self.free.pop()?;
        let guard = self.slots[index].clone().lock_owned().await;

        Some(PoolGuard {
            idx: index,
            guard: Some(guard),
            free: self.free.clone(),
        })
    }
}

/// An exclusively-held connection-pool slot. Returns its index to the free
/// list on drop.
pub(crate) struct PoolGuard {
    idx: usize,
    guard: Option<OwnedMutexGuard<HttpConnection>>,
    free: Arc<ArrayQueue<usize>>,
}

impl std::ops::Deref for PoolGuard {
    type Target = HttpConnection;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref().expect("guard taken before drop")
    }
}

impl std::ops::DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut().expect("guard taken before drop")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.guard.take();
        let _ = self.free.push(self.idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_limits() -> ReqLimits {
        ReqLimits::default().precalculate()
    }

    #[tokio::test]
    async fn acquire_and_release_round_trips_capacity() {
        let pool = Arc::new(ConnPool::new(2, &req_limits(), &RespLimits::default()));
        assert_eq!(pool.active(), 0);

        let first = pool.try_acquire().await.unwrap();
        assert_eq!(pool.active(), 1);
        let second = pool.try_acquire().await.unwrap();
        assert_eq!(pool.active(), 2);

        assert!(pool.try_acquire().await.is_none());

        drop(first);
        assert_eq!(pool.active(), 1);

        let third = pool.try_acquire().await.unwrap();
        assert_eq!(pool.active(), 2);

        drop(second);
        drop(third);
        assert_eq!(pool.active(), 0);
    }
}
