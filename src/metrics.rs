//! Per-manager counters and the text exposition format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter/gauge set for one [`PoolEngine`](crate::engine::PoolEngine).
///
/// Every field is an independent atomic so a counter bump never contends
/// with the mutex guarding pool membership — the ordering guarantee that
/// matters (§5 of the spec) is that membership and *its own* counters
/// (`additions`, `removals`) are updated under the same critical section as
/// the membership mutation, not that counters are globally serialized with
/// each other.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    additions: AtomicU64,
    evictions: AtomicU64,
    removals: AtomicU64,
    size: AtomicI64,
}

/// Point-in-time snapshot of a [`MetricsRegistry`], safe to hand to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total acquisition attempts.
    pub requests: u64,
    /// Acquisitions served from an existing live resource.
    pub hits: u64,
    /// Acquisitions against an empty pool that could not be served.
    pub misses: u64,
    /// Resources successfully admitted to the pool.
    pub additions: u64,
    /// Resources removed by the idle-eviction timer.
    pub evictions: u64,
    /// All resource removals by name (eviction, dead-removal, or drain).
    pub removals: u64,
    /// Current pool size.
    pub size: i64,
}

impl MetricsRegistry {
    /// Create an empty counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump `requests` by one.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump `hits` by one.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump `misses` by one.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump `additions` by one and set the size gauge.
    pub fn record_addition(&self, new_size: usize) {
        self.additions.fetch_add(1, Ordering::Relaxed);
        self.set_size(new_size);
    }

    /// Bump `evictions` and `removals` by one (idle-timer removal) and set the size gauge.
    pub fn record_eviction(&self, new_size: usize) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.removals.fetch_add(1, Ordering::Relaxed);
        self.set_size(new_size);
    }

    /// Bump `removals` by one (dead-handle or drain removal) and set the size gauge.
    pub fn record_removal(&self, new_size: usize) {
        self.removals.fetch_add(1, Ordering::Relaxed);
        self.set_size(new_size);
    }

    /// Set the `size` gauge directly (used after admission/removal decisions
    /// that don't go through `record_addition`/`record_removal`, e.g. startup).
    pub fn set_size(&self, size: usize) {
        self.size.store(size as i64, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            additions: self.additions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
        }
    }

    /// Render the Prometheus-style text exposition format described in the
    /// manager's metrics contract.
    #[must_use]
    pub fn to_text(&self, resource_type: &str, manager: &str) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let counters: [(&str, &str, u64); 6] = [
            ("requests_total", "Total acquisition attempts", s.requests),
            ("hits_total", "Acquisitions served from a live resource", s.hits),
            ("misses_total", "Acquisitions against an empty pool", s.misses),
            ("additions_total", "Resources admitted to the pool", s.additions),
            ("evictions_total", "Resources removed by idle eviction", s.evictions),
            ("removals_total", "All resource removals by name", s.removals),
        ];
        for (name, help, value) in counters {
            push_line(&mut out, name, help, "counter", resource_type, manager, value as i64);
        }
        push_line(
            &mut out,
            "size",
            "Current number of resources in the pool",
            "gauge",
            resource_type,
            manager,
            s.size,
        );
        out
    }
}

fn push_line(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    resource_type: &str,
    manager: &str,
    value: i64,
) {
    out.push_str(&format!("# HELP serverless_manager_pool_{name} {help}\n"));
    out.push_str(&format!("# TYPE serverless_manager_pool_{name} {kind}\n"));
    out.push_str(&format!(
        "serverless_manager_pool_{name}{{resource_type=\"{resource_type}\",manager=\"{manager}\"}} {value}\n"
    ));
}
