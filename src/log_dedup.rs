use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Suppresses repeated warnings about the same key.
///
/// A scroll session re-reads the same DOM many times, so a malformed href
/// would otherwise be reported on every iteration.
#[derive(Debug)]
pub struct LogDeduplicator {
    /// Map of log key -> last logged time
    last_logged: HashMap<String, Instant>,
    /// How long to suppress duplicate messages
    suppression_window: Duration,
}

impl LogDeduplicator {
    pub fn new(suppression_window: Duration) -> Self {
        Self {
            last_logged: HashMap::new(),
            suppression_window,
        }
    }

    /// Returns true if the message should be logged, false if it should be suppressed
    pub fn should_log(&mut self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(last_time) = self.last_logged.get(key) {
            if now.duration_since(*last_time) < self.suppression_window {
                return false;
            }
        }

        self.last_logged.insert(key.to_string(), now);
        true
    }

    /// Drop entries older than twice the suppression window
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        let window = self.suppression_window;
        self.last_logged
            .retain(|_, last_time| now.duration_since(*last_time) < window * 2);
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.last_logged.len()
    }
}

impl Default for LogDeduplicator {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_deduplication() {
        let mut dedup = LogDeduplicator::new(Duration::from_millis(100));

        assert!(dedup.should_log("bad-href"));
        assert!(!dedup.should_log("bad-href"));

        sleep(Duration::from_millis(150));
        assert!(dedup.should_log("bad-href"));
    }

    #[test]
    fn test_different_keys() {
        let mut dedup = LogDeduplicator::new(Duration::from_millis(100));

        assert!(dedup.should_log("message1"));
        assert!(dedup.should_log("message2"));
        assert!(!dedup.should_log("message1"));
        assert!(!dedup.should_log("message2"));
    }

    #[test]
    fn test_cleanup() {
        let mut dedup = LogDeduplicator::new(Duration::from_millis(50));

        dedup.should_log("test1");
        dedup.should_log("test2");
        dedup.should_log("test3");
        assert_eq!(dedup.tracked(), 3);

        sleep(Duration::from_millis(150));

        dedup.cleanup();
        assert_eq!(dedup.tracked(), 0);
    }
}
