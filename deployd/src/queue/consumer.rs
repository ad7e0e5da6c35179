//! Worker pool of a single queue
//!
//! A fetcher reserves messages into a bounded buffer that `min_workers`
//! permanent workers drain. When the buffer backs up, elastic workers are
//! added up to `max_workers`; they exit after `consumer_idle_timeout`
//! without work. Reservations of messages being handled are extended so a
//! slow handler does not see its own message redelivered.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::backend::QueueBackend;
use super::factory::{TaskContext, TaskRegistry};
use super::message::Message;
use super::options::QueueOptions;
use crate::errors::DeployError;
use crate::utils::{calc_exp_backoff, BackoffOptions};

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<Message>>>;
type InFlight = Arc<Mutex<HashSet<String>>>;

pub(crate) struct Consumer {
    pub options: QueueOptions,
    pub backend: Arc<dyn QueueBackend>,
    pub tasks: Arc<TaskRegistry>,
    pub cancel: watch::Receiver<bool>,
}

impl Consumer {
    pub async fn run(self) {
        let this = Arc::new(self);
        let queue = this.options.name.clone();
        info!(queue = %queue, "Queue consumer starting...");

        let (tx, rx) = mpsc::channel::<Message>(this.options.buffer_size);
        let rx: SharedReceiver = Arc::new(AsyncMutex::new(rx));
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = JoinSet::new();
        for _ in 0..this.options.min_workers.max(1) {
            workers.spawn(this.clone().work(rx.clone(), in_flight.clone(), false));
        }
        let heartbeat = tokio::spawn(this.clone().heartbeat(in_flight.clone()));

        let mut cancel = this.cancel.clone();
        let backoff = BackoffOptions::default();
        let mut failures: u32 = 0;

        'fetch: loop {
            if *cancel.borrow() {
                break;
            }
            while let Some(result) = workers.try_join_next() {
                if let Err(e) = result {
                    error!(queue = %queue, "Queue worker panicked: {}", e);
                }
            }

            let batch = this.options.reservation_size.min(tx.capacity()).max(1);
            let reserved = tokio::select! {
                _ = cancel.changed() => break,
                reserved = this.backend.reserve(&queue, batch, this.options.reservation_timeout) => reserved,
            };

            let messages = match reserved {
                Ok(messages) => {
                    failures = 0;
                    messages
                }
                Err(e) => {
                    let delay = calc_exp_backoff(&backoff, failures);
                    failures = failures.saturating_add(1);
                    error!(queue = %queue, "Failed to fetch messages, retrying in {:?}: {}", delay, e);
                    tokio::select! {
                        _ = cancel.changed() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = tokio::time::sleep(this.options.wait_timeout) => continue,
                }
            }

            for message in messages {
                lock(&in_flight).insert(message.id.clone());
                tokio::select! {
                    _ = cancel.changed() => break 'fetch,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            break 'fetch;
                        }
                    }
                }
            }

            let backlog = this.options.buffer_size - tx.capacity();
            if backlog > 0 && workers.len() < this.options.max_workers {
                debug!(queue = %queue, "Adding elastic worker ({} buffered)", backlog);
                workers.spawn(this.clone().work(rx.clone(), in_flight.clone(), true));
            }
        }

        // workers finish their current message, then see the closed channel
        drop(tx);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(queue = %queue, "Queue worker panicked: {}", e);
            }
        }
        heartbeat.abort();
        info!(queue = %queue, "Queue consumer stopped");
    }

    async fn work(self: Arc<Self>, rx: SharedReceiver, in_flight: InFlight, elastic: bool) {
        loop {
            let next = if elastic {
                let receive = async { rx.lock().await.recv().await };
                match tokio::time::timeout(self.options.consumer_idle_timeout, receive).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(queue = %self.options.name, "Elastic worker idle, exiting");
                        return;
                    }
                }
            } else {
                rx.lock().await.recv().await
            };

            let Some(message) = next else {
                return;
            };
            let id = message.id.clone();

            // buffered but not started: leave it for redelivery
            if *self.cancel.borrow() {
                lock(&in_flight).remove(&id);
                return;
            }

            self.handle(message).await;
            lock(&in_flight).remove(&id);
        }
    }

    async fn handle(&self, message: Message) {
        let queue = &self.options.name;
        let task = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&message.task_name)
            .cloned();

        let result = match task {
            Some(task) => {
                let ctx = TaskContext::new(queue, &message, self.cancel.clone());
                // a panicking handler surfaces as a JoinError
                match tokio::spawn(task(ctx, message.payload.clone())).await {
                    Ok(result) => result,
                    Err(e) => Err(DeployError::Internal(format!("task panicked: {}", e))),
                }
            }
            None => Err(DeployError::QueueError(format!(
                "no handler registered for {}",
                message.task_name
            ))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.backend.ack(queue, &message.id).await {
                    error!(queue = %queue, message_id = %message.id, "Failed to ack message: {}", e);
                }
            }
            Err(e) if message.attempts >= self.options.retry_limit => {
                error!(
                    queue = %queue,
                    message_id = %message.id,
                    "Dropping {} after {} attempts: {}",
                    message.task_name,
                    message.attempts,
                    e
                );
                if let Err(e) = self.backend.ack(queue, &message.id).await {
                    error!(queue = %queue, message_id = %message.id, "Failed to drop message: {}", e);
                }
            }
            Err(e) => {
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    "{} failed on attempt {}, will be redelivered: {}",
                    message.task_name,
                    message.attempts,
                    e
                );
            }
        }
    }

    async fn heartbeat(self: Arc<Self>, in_flight: InFlight) {
        let period = (self.options.reservation_timeout / 2).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let ids: Vec<String> = lock(&in_flight).iter().cloned().collect();
            for id in ids {
                if let Err(e) = self
                    .backend
                    .extend(&self.options.name, &id, self.options.reservation_timeout)
                    .await
                {
                    warn!(queue = %self.options.name, message_id = %id, "Failed to extend reservation: {}", e);
                }
            }
        }
    }
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}
