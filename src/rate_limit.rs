//! Per-source-IP admission control.
//!
//! Each accept loop consults this before handing a socket off to a pooled
//! connection, and releases the slot back when the connection closes. A
//! bucketed `Mutex<Vec<...>>` table (rather than a full `DashMap`-style
//! concurrent hash map, which isn't part of the teacher's dependency stack)
//! keeps contention local to whichever bucket an IP hashes into.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::limits::RateLimits;
use crate::util::fnv1a;

struct Bucket {
    entries: Mutex<Vec<(IpAddr, Arc<AtomicU32>)>>,
}

/// Tracks concurrently active connections per source IP and admits or
/// rejects new ones against a fixed per-IP ceiling.
pub(crate) struct RateLimiter {
    buckets: Vec<Bucket>,
    per_ip_limit: u32,
}

impl RateLimiter {
    pub(crate) fn new(limits: &RateLimits) -> Self {
        let bucket_count = limits.bucket_count.max(1);
        let buckets = (0..bucket_count)
            .map(|_| Bucket {
                entries: Mutex::new(Vec::new()),
            })
            .collect();

        Self {
            buckets,
            per_ip_limit: limits.per_ip_limit as u32,
        }
    }

    fn bucket_for(&self, ip: IpAddr) -> &Bucket {
        let key = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let index = (fnv1a(&key) as usize) % self.buckets.len();
        &self.buckets[index]
    }

    /// Atomically checks-and-increments the counter for `ip`. Returns `false`
    /// (and leaves the counter untouched) if `ip` is already at its
    /// concurrency ceiling. The check and increment happen under the same
    /// bucket lock acquisition, so concurrent accept-loop tasks racing on the
    /// same IP cannot both observe a free slot and overshoot the limit.
    ///
    /// `ip.is_unspecified()` (e.g. a loopback probe bound to `0.0.0.0`) is
    /// never tracked and always admitted.
    pub(crate) fn try_acquire(&self, ip: IpAddr) -> bool {
        if ip.is_unspecified() {
            return true;
        }

        let bucket = self.bucket_for(ip);
        let mut entries = bucket.entries.lock().expect("rate limiter bucket poisoned");

        if let Some((_, counter)) = entries.iter().find(|(entry_ip, _)| *entry_ip == ip) {
            let mut current = counter.load(Ordering::Relaxed);
            loop {
                if current >= self.per_ip_limit {
                    return false;
                }
                match counter.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return true,
                    Err(observed) => current = observed,
                }
            }
        }

        entries.push((ip, Arc::new(AtomicU32::new(1))));
        true
    }

    /// Releases one admitted slot for `ip`. Entries whose counter reaches
    /// zero are pruned from the bucket so long-idle IPs don't pin memory.
    ///
    /// `fetch_sub` returns the pre-decrement value, so the "does this entry
    /// go to zero" check is `previous == 1`, not `previous == 0` — using the
    /// post-decrement value here would let two concurrent releases both see
    /// `0` and both attempt the prune.
    pub(crate) fn release(&self, ip: IpAddr) {
        if ip.is_unspecified() {
            return;
        }

        let bucket = self.bucket_for(ip);
        let mut entries = bucket.entries.lock().expect("rate limiter bucket poisoned");

        let mut drop_index = None;
        for (index, (entry_ip, counter)) in entries.iter().enumerate() {
            if *entry_ip == ip {
                let previous = counter.fetch_sub(1, Ordering::Relaxed);
                if previous == 1 {
                    drop_index = Some(index);
                }
                break;
            }
        }

        if let Some(index) = drop_index {
            entries.swap_remove(index);
        }
    }
}
