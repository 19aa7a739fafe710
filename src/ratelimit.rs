//! Request admission control.
//!
//! Fixed-window counters keyed by `(client_id, action)`. Each window admits
//! up to the configured ceiling for that action; the first request past the
//! ceiling is denied with a retry hint. Counters live in a `DashMap` and are
//! updated through the entry API so concurrent increments cannot be lost.
//!
//! Stale windows are evicted by [`RateLimiter::cleanup`], which a background
//! task runs periodically; without it the map would grow by one entry per
//! distinct client ever seen.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Actions accounted separately per client.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Action {
    Upload,
    Download,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// Ceilings and window size. These are configuration values, not constants.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub uploads_per_window: u32,
    pub downloads_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            uploads_per_window: 10,
            downloads_per_window: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Denial with a hint for when the caller may try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

struct WindowSlot {
    window_start: Instant,
    count: u32,
}

/// Shared counter store, safe under concurrent callers.
pub struct RateLimiter {
    config: RateLimitConfig,
    slots: DashMap<(String, Action), WindowSlot>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
        }
    }

    fn ceiling(&self, action: Action) -> u32 {
        match action {
            Action::Upload => self.config.uploads_per_window,
            Action::Download => self.config.downloads_per_window,
        }
    }

    /// Count one `action` for `client_id`; deny once the window's ceiling
    /// would be exceeded. The check and the increment happen under the
    /// entry lock for the key, so parallel callers cannot both sneak past
    /// the ceiling.
    pub fn check(&self, client_id: &str, action: Action) -> Result<(), RateLimited> {
        let now = Instant::now();
        let ceiling = self.ceiling(action);
        let window = self.config.window;

        let mut slot = self
            .slots
            .entry((client_id.to_string(), action))
            .or_insert_with(|| WindowSlot {
                window_start: now,
                count: 0,
            });

        if now.duration_since(slot.window_start) >= window {
            slot.window_start = now;
            slot.count = 0;
        }

        if slot.count >= ceiling {
            let elapsed = now.duration_since(slot.window_start);
            let remaining = window.saturating_sub(elapsed);
            tracing::debug!(
                client = client_id,
                action = action.as_str(),
                count = slot.count,
                ceiling,
                "rate limit exceeded"
            );
            return Err(RateLimited {
                retry_after_secs: remaining.as_secs() + 1,
            });
        }

        slot.count += 1;
        Ok(())
    }

    /// Evict windows that ended long enough ago that their counts no longer
    /// matter. Returns the number of entries removed. Removals are counted
    /// inside the retain pass: concurrent `check` calls may insert new
    /// entries while it runs, so a before/after length difference is not a
    /// valid removal count.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.config.window * 2;
        let mut evicted = 0;
        self.slots.retain(|_, slot| {
            let keep = now.duration_since(slot.window_start) < stale_after;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Number of tracked `(client, action)` windows.
    pub fn entry_count(&self) -> usize {
        self.slots.len()
    }
}

/// Spawn a background task that periodically evicts stale counter windows.
pub fn spawn_cleanup_task(
    limiter: std::sync::Arc<RateLimiter>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let evicted = limiter.cleanup();
            if evicted > 0 {
                tracing::debug!(evicted, "rate limiter evicted stale windows");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(ceiling: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            uploads_per_window: ceiling,
            downloads_per_window: ceiling,
            window,
        })
    }

    #[test]
    fn denies_the_request_past_the_ceiling() {
        let limiter = limiter(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1", Action::Upload).is_ok());
        }
        let denied = limiter.check("10.0.0.1", Action::Upload);
        assert!(denied.is_err());
        assert!(denied.unwrap_err().retry_after_secs >= 1);
    }

    #[test]
    fn window_elapse_resets_the_counter() {
        let limiter = limiter(2, Duration::from_millis(50));
        assert!(limiter.check("c", Action::Download).is_ok());
        assert!(limiter.check("c", Action::Download).is_ok());
        assert!(limiter.check("c", Action::Download).is_err());

        std::thread::sleep(Duration::from_millis(70));
        assert!(limiter.check("c", Action::Download).is_ok());
    }

    #[test]
    fn clients_and_actions_are_accounted_separately() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("a", Action::Upload).is_ok());
        assert!(limiter.check("a", Action::Upload).is_err());
        assert!(limiter.check("a", Action::Download).is_ok());
        assert!(limiter.check("b", Action::Upload).is_ok());
    }

    #[test]
    fn cleanup_counts_removals_while_new_clients_arrive() {
        let limiter = std::sync::Arc::new(limiter(5, Duration::from_millis(10)));
        for i in 0..64 {
            limiter.check(&format!("stale-{i}"), Action::Upload).unwrap();
        }
        std::thread::sleep(Duration::from_millis(40));

        // Fresh clients keep inserting while the eviction pass runs; the
        // eviction count must stay exact regardless of map growth.
        let writers: Vec<_> = (0..8)
            .map(|t| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let _ = limiter.check(&format!("fresh-{t}-{i}"), Action::Download);
                    }
                })
            })
            .collect();
        let evicted = limiter.cleanup();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(evicted, 64);
    }

    #[test]
    fn cleanup_evicts_expired_windows_only() {
        let limiter = limiter(5, Duration::from_millis(20));
        limiter.check("old", Action::Upload).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        limiter.check("fresh", Action::Upload).unwrap();

        let evicted = limiter.cleanup();
        assert_eq!(evicted, 1);
        assert_eq!(limiter.entry_count(), 1);
    }
}
