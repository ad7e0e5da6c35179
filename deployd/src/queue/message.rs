//! Queue messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A serialized task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Deduplication key
    pub id: String,
    /// `<task name>@v<version>`
    pub task_name: String,
    pub payload: serde_json::Value,
    /// Deliveries so far
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub reserved_until: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: Option<String>, task_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_name: task_name.into(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
            reserved_until: None,
        }
    }

    /// Not reserved, or the reservation has lapsed
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.reserved_until.map_or(true, |until| until <= now)
    }

    /// Reserve for `reservation` and count the delivery
    pub fn reserve(&mut self, now: DateTime<Utc>, reservation: std::time::Duration) {
        let reservation =
            chrono::Duration::from_std(reservation).unwrap_or_else(|_| chrono::Duration::days(1));
        self.reserved_until = Some(now + reservation);
        self.attempts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reservation_lapses() {
        let mut message = Message::new(None, "create-deployment@v1", serde_json::json!({}));
        let now = Utc::now();
        assert!(message.is_available(now));

        message.reserve(now, Duration::from_secs(10));
        assert_eq!(message.attempts, 1);
        assert!(!message.is_available(now + chrono::Duration::seconds(5)));
        assert!(message.is_available(now + chrono::Duration::seconds(10)));
    }
}
