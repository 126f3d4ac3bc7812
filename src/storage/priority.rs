//! Sliding-window failure log and adaptive effective-priority reordering.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    failures: Vec<Instant>,
}

/// Tracks recent failures per source name and demotes a source to the end
/// of the priority list once its failure rate inside the window exceeds a
/// threshold.
pub struct FailureLog {
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl FailureLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, source: &str) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let entry = entries.entry(source.to_string()).or_insert_with(|| Window { failures: Vec::new() });
        entry.failures.push(now);
        entry.failures.retain(|t| now.duration_since(*t) <= self.window);
    }

    pub fn clear(&self, source: &str) {
        self.entries.lock().unwrap().remove(source);
    }

    /// Failure count inside the current window, pruning stale entries.
    fn failure_count(&self, source: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(source) else {
            return 0;
        };
        let now = Instant::now();
        entry.failures.retain(|t| now.duration_since(*t) <= self.window);
        entry.failures.len()
    }

    /// A source is "over threshold" once its failure count in the window
    /// reaches a small fixed bar (3) and the resulting rate (relative to
    /// the window) exceeds `failure_rate_threshold`. Sources over threshold
    /// are moved to the end, preserving relative order otherwise.
    pub fn effective_priority(&self, configured: &[String], failure_rate_threshold: f64) -> Vec<String> {
        let window_secs = self.window.as_secs_f64().max(1.0);
        let (mut healthy, mut degraded): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
        for name in configured {
            let failures = self.failure_count(name);
            let rate = failures as f64 / window_secs;
            if failures >= 3 && rate > failure_rate_threshold {
                degraded.push(name.clone());
            } else {
                healthy.push(name.clone());
            }
        }
        healthy.extend(degraded);
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_source_moved_to_end() {
        let log = FailureLog::new(Duration::from_secs(60));
        for _ in 0..5 {
            log.record_failure("r2");
        }
        let order = log.effective_priority(&["r2".into(), "remote".into(), "fallback".into()], 0.01);
        assert_eq!(order, vec!["remote".to_string(), "fallback".to_string(), "r2".to_string()]);
    }

    #[test]
    fn healthy_sources_keep_configured_order() {
        let log = FailureLog::new(Duration::from_secs(60));
        let order = log.effective_priority(&["r2".into(), "remote".into()], 0.5);
        assert_eq!(order, vec!["r2".to_string(), "remote".to_string()]);
    }

    #[test]
    fn clear_resets_failure_window() {
        let log = FailureLog::new(Duration::from_secs(60));
        for _ in 0..5 {
            log.record_failure("r2");
        }
        log.clear("r2");
        let order = log.effective_priority(&["r2".into(), "remote".into()], 0.01);
        assert_eq!(order, vec!["r2".to_string(), "remote".to_string()]);
    }
}
