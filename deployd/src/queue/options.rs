//! Queue options

use std::time::Duration;

use crate::errors::DeployError;

/// Worker bounds and timeouts of a named queue
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub name: String,
    /// Workers that live as long as the consumer
    pub min_workers: usize,
    /// Upper bound including elastic workers
    pub max_workers: usize,
    /// Capacity of the in-memory dispatch buffer
    pub buffer_size: usize,
    /// Messages reserved per fetch
    pub reservation_size: usize,
    /// How long a reserved message is hidden from other consumers
    pub reservation_timeout: Duration,
    /// Idle poll interval when the queue is empty
    pub wait_timeout: Duration,
    /// Elastic workers exit after this long without work
    pub consumer_idle_timeout: Duration,
    /// Deliveries before a failing message is dropped
    pub retry_limit: u32,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        let invalid = |reason: &str| {
            Err(DeployError::ConfigError(format!(
                "queue {}: {}",
                self.name, reason
            )))
        };
        if self.name.is_empty() {
            return invalid("name is required");
        }
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1");
        }
        if self.min_workers > self.max_workers {
            return invalid("min_workers exceeds max_workers");
        }
        if self.buffer_size == 0 || self.reservation_size == 0 {
            return invalid("buffer_size and reservation_size must be at least 1");
        }
        if self.retry_limit == 0 {
            return invalid("retry_limit must be at least 1");
        }
        if self.reservation_timeout.is_zero() {
            return invalid("reservation_timeout must be positive");
        }
        Ok(())
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_workers: 1,
            max_workers: 10,
            buffer_size: 100,
            reservation_size: 10,
            reservation_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(5),
            consumer_idle_timeout: Duration::from_secs(600),
            retry_limit: 3,
        }
    }
}
