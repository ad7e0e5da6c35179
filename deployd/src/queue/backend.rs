//! Queue storage backends

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::message::Message;
use crate::errors::DeployError;

/// Where messages live between enqueue and acknowledgement
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a message. Returns `false` if a message with the same ID is
    /// already queued.
    async fn push(&self, queue: &str, message: Message) -> Result<bool, DeployError>;

    /// Reserve up to `max` available messages, oldest first
    async fn reserve(
        &self,
        queue: &str,
        max: usize,
        reservation: Duration,
    ) -> Result<Vec<Message>, DeployError>;

    /// Push the reservation deadline of a message being handled
    async fn extend(&self, queue: &str, id: &str, reservation: Duration)
        -> Result<(), DeployError>;

    /// Remove a message; unknown IDs are ignored
    async fn ack(&self, queue: &str, id: &str) -> Result<(), DeployError>;

    /// Messages stored, reserved or not
    async fn len(&self, queue: &str) -> Result<usize, DeployError>;
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryBackend {
    queues: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, queue: &str, message: Message) -> Result<bool, DeployError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let messages = queues.entry(queue.to_string()).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            return Ok(false);
        }
        messages.push(message);
        Ok(true)
    }

    async fn reserve(
        &self,
        queue: &str,
        max: usize,
        reservation: Duration,
    ) -> Result<Vec<Message>, DeployError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let Some(messages) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut reserved = Vec::new();
        // kept in push order, so this is oldest first
        for message in messages.iter_mut() {
            if reserved.len() >= max {
                break;
            }
            if message.is_available(now) {
                message.reserve(now, reservation);
                reserved.push(message.clone());
            }
        }
        Ok(reserved)
    }

    async fn extend(
        &self,
        queue: &str,
        id: &str,
        reservation: Duration,
    ) -> Result<(), DeployError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(message) = queues
            .get_mut(queue)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == id))
        {
            let attempts = message.attempts;
            message.reserve(Utc::now(), reservation);
            message.attempts = attempts;
        }
        Ok(())
    }

    async fn ack(&self, queue: &str, id: &str) -> Result<(), DeployError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(messages) = queues.get_mut(queue) {
            messages.retain(|m| m.id != id);
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, DeployError> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues.get(queue).map_or(0, Vec::len))
    }
}
