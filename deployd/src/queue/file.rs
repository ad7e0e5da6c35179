//! Queue backend spooling messages to disk
//!
//! One JSON document per message under `<root>/<queue>/<id>.json`. Every
//! change rewrites the document atomically, so a crash never leaves a
//! half-written message behind.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use super::backend::QueueBackend;
use super::message::Message;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub struct FileBackend {
    root: Dir,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(root: Dir) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    fn message_file(&self, queue: &str, id: &str) -> Result<File, DeployError> {
        let safe = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        if !safe(queue) || !safe(id) {
            return Err(DeployError::QueueError(format!(
                "queue name and message ID must be [A-Za-z0-9_-]: {}/{}",
                queue, id
            )));
        }
        Ok(self.root.subdir(queue).file(&format!("{}.json", id)))
    }

    /// Messages of a queue, oldest first; unreadable files are skipped
    async fn load(&self, queue: &str) -> Result<Vec<Message>, DeployError> {
        let mut messages = Vec::new();
        for file in self.root.subdir(queue).list_files("json").await? {
            match file.read_json::<Message>().await {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping unreadable message {}: {}", file.path().display(), e),
            }
        }
        messages.sort_by_key(|m| m.enqueued_at);
        Ok(messages)
    }
}

#[async_trait]
impl QueueBackend for FileBackend {
    async fn push(&self, queue: &str, message: Message) -> Result<bool, DeployError> {
        let _guard = self.lock.lock().await;
        let file = self.message_file(queue, &message.id)?;
        if file.exists().await {
            return Ok(false);
        }
        file.write_json(&message).await?;
        Ok(true)
    }

    async fn reserve(
        &self,
        queue: &str,
        max: usize,
        reservation: Duration,
    ) -> Result<Vec<Message>, DeployError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let mut reserved = Vec::new();

        for mut message in self.load(queue).await? {
            if reserved.len() >= max {
                break;
            }
            if !message.is_available(now) {
                continue;
            }
            message.reserve(now, reservation);
            self.message_file(queue, &message.id)?
                .write_json(&message)
                .await?;
            reserved.push(message);
        }
        Ok(reserved)
    }

    async fn extend(
        &self,
        queue: &str,
        id: &str,
        reservation: Duration,
    ) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        let file = self.message_file(queue, id)?;
        if !file.exists().await {
            return Ok(());
        }
        let mut message: Message = file.read_json().await?;
        let attempts = message.attempts;
        message.reserve(Utc::now(), reservation);
        message.attempts = attempts;
        file.write_json(&message).await
    }

    async fn ack(&self, queue: &str, id: &str) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        self.message_file(queue, id)?.delete().await
    }

    async fn len(&self, queue: &str) -> Result<usize, DeployError> {
        Ok(self.root.subdir(queue).list_files("json").await?.len())
    }
}
