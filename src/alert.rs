use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

/// Decides which labels may reach the notifier.
///
/// One instance per process. The cooldown map is keyed by label only and every
/// check-and-set happens under a single lock acquisition, so two concurrent
/// requests cannot both pass the window for the same label.
#[derive(Debug)]
pub struct AlertPolicy {
    safe_labels: HashSet<String>,
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertPolicy {
    pub fn new<I, S>(safe_labels: I, cooldown: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            safe_labels: safe_labels.into_iter().map(Into::into).collect(),
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_safe(&self, label: &str) -> bool {
        self.safe_labels.contains(label)
    }

    pub fn is_alert_worthy(&self, label: &str) -> bool {
        !self.is_safe(label)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Cooldown-gated check for the live feed. Records `now` when it returns true.
    pub fn should_alert(&self, label: &str, now: Instant) -> bool {
        if self.is_safe(label) {
            return false;
        }

        let mut last_sent = self.last_sent.lock();
        let within_window = last_sent
            .get(label)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.cooldown);
        if within_window {
            tracing::debug!("Alert for `{}` suppressed by cooldown", label);
            return false;
        }

        last_sent.insert(label.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn policy(window_secs: u64) -> AlertPolicy {
        AlertPolicy::new(["Unknown", "road"], Duration::from_secs(window_secs))
    }

    #[test]
    fn test_cooldown_window() {
        let policy = policy(60);
        let start = Instant::now();

        assert!(policy.should_alert("fire", start));
        assert!(!policy.should_alert("fire", start + Duration::from_secs(30)));
        assert!(policy.should_alert("fire", start + Duration::from_secs(60)));
        assert!(!policy.should_alert("fire", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_cooldown_is_per_label() {
        let policy = policy(60);
        let now = Instant::now();

        assert!(policy.should_alert("fire", now));
        assert!(policy.should_alert("violence", now));
        assert!(!policy.should_alert("fire", now));
    }

    #[test]
    fn test_safe_labels_never_alert() {
        let policy = policy(0);
        let now = Instant::now();

        for offset in 0..5 {
            assert!(!policy.should_alert("road", now + Duration::from_secs(offset)));
        }
        assert!(!policy.is_alert_worthy("Unknown"));
        assert!(policy.is_alert_worthy("fire"));
    }

    #[test]
    fn test_concurrent_checks_admit_one_alert() {
        let policy = Arc::new(policy(60));
        let admitted = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let policy = policy.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    if policy.should_alert("fire", now) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
