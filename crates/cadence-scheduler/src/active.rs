//! Active-job registry — schedule ids currently executing in this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory set of running schedule ids. Cheap to clone; clones share state.
///
/// Ids are reference counted so a manual run overlapping a timer run does not
/// release the timer run's claim when it finishes first.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    running: Arc<Mutex<HashMap<String, usize>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Claim `id` for a timer-driven run. Returns None if it is already running.
    ///
    /// Check and insert happen under one lock.
    pub fn try_claim(&self, id: &str) -> Option<ActiveGuard> {
        let mut running = self.lock();
        if running.contains_key(id) {
            return None;
        }
        running.insert(id.to_string(), 1);
        Some(ActiveGuard {
            jobs: self.clone(),
            id: id.to_string(),
        })
    }

    /// Mark `id` as running regardless of current state (manual runs).
    pub fn claim(&self, id: &str) -> ActiveGuard {
        *self.lock().entry(id.to_string()).or_insert(0) += 1;
        ActiveGuard {
            jobs: self.clone(),
            id: id.to_string(),
        }
    }
}

/// Removes its id from the registry when dropped, including on unwind.
#[derive(Debug)]
pub struct ActiveGuard {
    jobs: ActiveJobs,
    id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut running = self.jobs.lock();
        if let Some(count) = running.get_mut(&self.id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_blocks_second_timer_claim() {
        let jobs = ActiveJobs::new();
        let guard = jobs.try_claim("a").unwrap();
        assert!(jobs.contains("a"));
        assert!(jobs.try_claim("a").is_none());
        assert!(jobs.try_claim("b").is_some());
        drop(guard);
        assert!(!jobs.contains("a"));
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_overlapping_manual_run_keeps_timer_claim() {
        let jobs = ActiveJobs::new();
        let timer = jobs.try_claim("a").unwrap();
        let manual = jobs.claim("a");
        drop(manual);
        assert!(jobs.contains("a"));
        drop(timer);
        assert!(!jobs.contains("a"));
    }

    #[test]
    fn test_guard_released_on_panic() {
        let jobs = ActiveJobs::new();
        let cloned = jobs.clone();
        let outcome = std::panic::catch_unwind(move || {
            let _guard = cloned.claim("x");
            panic!("task blew up");
        });
        assert!(outcome.is_err());
        assert!(!jobs.contains("x"));
    }
}
