//! Proactor configuration.
//!
//! Defaults come from the environment so deployments can be tuned without a
//! rebuild:
//!
//! - `PAIO_QUEUE_DEPTH` — per-lane submission queue depth (default 1024)
//! - `PAIO_SQ_ENTRIES` — backend submission queue size (default 256)
//! - `PAIO_TICK_MS` — coarse timer tick (default 10)
//! - `PAIO_WAIT_MAX_MS` — idle wait cap for workers (default 50)
//! - `PAIO_REMOVE_RETRIES` — 1 ms polls before remove gives up (default 5000)

use std::time::Duration;

use paio_core::env::env_get;

#[derive(Debug, Clone)]
pub struct ProactorConfig {
    /// Max concurrent async objects.
    pub capacity: usize,
    /// Depth of each submission lane; a full lane is backpressure.
    pub queue_depth: usize,
    /// Backend submission queue size (power of 2).
    pub sq_entries: u32,
    /// Coarse timer tick.
    pub tick: Duration,
    /// Upper bound on one blocking wait when no deadline is closer.
    pub max_wait: Duration,
    /// Bounded-polling budget (1 ms steps) for `remove_object` and `exit`.
    pub remove_retries: u32,
}

impl Default for ProactorConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            queue_depth: env_get("PAIO_QUEUE_DEPTH", 1024),
            sq_entries: env_get("PAIO_SQ_ENTRIES", 256),
            tick: Duration::from_millis(env_get("PAIO_TICK_MS", 10u64)),
            max_wait: Duration::from_millis(env_get("PAIO_WAIT_MAX_MS", 50u64)),
            remove_retries: env_get("PAIO_REMOVE_RETRIES", 5000),
        }
    }
}

impl ProactorConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn queue_depth(mut self, n: usize) -> Self {
        self.queue_depth = n.max(1);
        self
    }

    pub fn sq_entries(mut self, n: u32) -> Self {
        self.sq_entries = n;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn remove_retries(mut self, n: u32) -> Self {
        self.remove_retries = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let c = ProactorConfig::new(64)
            .queue_depth(8)
            .tick(Duration::from_millis(5))
            .remove_retries(10);
        assert_eq!(c.capacity, 64);
        assert_eq!(c.queue_depth, 8);
        assert_eq!(c.tick, Duration::from_millis(5));
        assert_eq!(c.remove_retries, 10);
    }

    #[test]
    fn test_queue_depth_floor() {
        let c = ProactorConfig::new(1).queue_depth(0);
        assert_eq!(c.queue_depth, 1);
    }
}
