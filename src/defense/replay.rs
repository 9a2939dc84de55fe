//! Replay detection.
//!
//! Recent inbound requests are hashed (SHA3-256 over a per-process random
//! salt plus the payload) and kept in a short window; a repeated hash
//! inside the window is a replay. The salt means an attacker who sees a
//! hash cannot forge collisions against another process.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use sha3::{Digest, Sha3_256};

pub struct ReplayDetector {
    salt: [u8; 16],
    window: Duration,
    seen: Mutex<VecDeque<(String, Instant)>>,
}

impl ReplayDetector {
    pub fn new(window: Duration) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt,
            window,
            seen: Mutex::new(VecDeque::new()),
        }
    }

    fn digest(&self, payload: &str) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.salt);
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record one inbound request. Returns true when the same payload was
    /// already seen inside the window.
    pub fn record(&self, payload: &str) -> bool {
        let hash = self.digest(payload);
        let now = Instant::now();

        let mut seen = self.seen.lock().unwrap();
        while let Some((_, at)) = seen.front() {
            if now.duration_since(*at) >= self.window {
                seen.pop_front();
            } else {
                break;
            }
        }

        let is_replay = seen.iter().any(|(h, _)| *h == hash);
        seen.push_back((hash, now));
        is_replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_is_not_replay() {
        let detector = ReplayDetector::new(Duration::from_secs(60));
        assert!(!detector.record("request-1"));
        assert!(!detector.record("request-2"));
    }

    #[test]
    fn test_repeat_within_window_is_replay() {
        let detector = ReplayDetector::new(Duration::from_secs(60));
        assert!(!detector.record("same payload"));
        assert!(detector.record("same payload"));
    }

    #[test]
    fn test_repeat_outside_window_is_clean() {
        let detector = ReplayDetector::new(Duration::from_millis(0));
        assert!(!detector.record("payload"));
        // Zero-length window: the first record has already expired.
        assert!(!detector.record("payload"));
    }
}
