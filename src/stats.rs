//! Monotonic run counters, shared across every stage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// The counters a run accumulates. All increments are atomic; `cancelled`
/// is sticky (`set(true)` is the only transition it ever makes).
pub struct FuzzStats {
    pub pending_seeds: AtomicU64,
    pub pending_fuzz: AtomicU64,
    pub processed: AtomicU64,
    pub filtered: AtomicU64,
    pub backfeed: AtomicU64,
    pub total_req: AtomicU64,
    pub cancelled: AtomicBool,
    pub starttime: Instant,
    pub seed_list: Mutex<Vec<String>>,
}

impl FuzzStats {
    pub fn new() -> Self {
        Self {
            pending_seeds: AtomicU64::new(0),
            pending_fuzz: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            backfeed: AtomicU64::new(0),
            total_req: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            starttime: Instant::now(),
            seed_list: Mutex::new(Vec::new()),
        }
    }

    pub fn new_seed(&self, url: &str) {
        self.pending_seeds.fetch_add(1, Ordering::SeqCst);
        self.seed_list.lock().unwrap().push(url.to_string());
    }

    pub fn new_backfeed(&self) {
        self.backfeed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn inc_pending_fuzz(&self) {
        self.pending_fuzz.fetch_add(1, Ordering::SeqCst);
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.total_req.fetch_add(1, Ordering::SeqCst);
    }

    pub fn inc_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn pending_fuzz(&self) -> u64 {
        self.pending_fuzz.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn seed_list_snapshot(&self) -> Vec<String> {
        self.seed_list.lock().unwrap().clone()
    }
}

impl Default for FuzzStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_never_exceeds_pending_fuzz() {
        let stats = FuzzStats::new();
        stats.inc_pending_fuzz();
        stats.inc_pending_fuzz();
        stats.inc_processed();
        assert!(stats.processed() <= stats.pending_fuzz());
    }

    #[test]
    fn cancelled_is_sticky() {
        let stats = FuzzStats::new();
        assert!(!stats.is_cancelled());
        stats.cancel();
        assert!(stats.is_cancelled());
        stats.cancel();
        assert!(stats.is_cancelled());
    }
}
