//! Queue and task registration
//!
//! A [`QueueFactory`] is constructed explicitly and owns its queues, tasks
//! and consumers. Registration is idempotent so setup code may run more
//! than once.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::QueueBackend;
use super::consumer::Consumer;
use super::message::Message;
use super::options::QueueOptions;
use crate::errors::DeployError;

/// What a handler gets besides its payload
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub queue: String,
    pub message_id: String,
    /// 1 on first delivery
    pub attempt: u32,
    cancel: watch::Receiver<bool>,
}

impl TaskContext {
    pub(crate) fn new(
        queue: &str,
        message: &Message,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue: queue.to_string(),
            message_id: message.id.clone(),
            attempt: message.attempts,
            cancel,
        }
    }

    /// Whether the queue is shutting down
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

pub(crate) type TaskFn =
    Arc<dyn Fn(TaskContext, serde_json::Value) -> BoxFuture<'static, Result<(), DeployError>> + Send + Sync>;

/// Tasks by `<name>@v<version>`
pub(crate) type TaskRegistry = RwLock<HashMap<String, TaskFn>>;

/// Typed reference to a registered task
#[derive(Debug)]
pub struct TaskHandle<P> {
    name: String,
    version: u32,
    _payload: PhantomData<fn(P)>,
}

impl<P> TaskHandle<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn key(&self) -> String {
        task_key(&self.name, self.version)
    }
}

impl<P> Clone for TaskHandle<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version,
            _payload: PhantomData,
        }
    }
}

fn task_key(name: &str, version: u32) -> String {
    format!("{}@v{}", name, version)
}

/// Producer side of a registered queue
#[derive(Clone)]
pub struct QueueHandle {
    name: String,
    backend: Arc<dyn QueueBackend>,
    closed: Arc<AtomicBool>,
}

impl QueueHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize `payload` and store it; returns the message ID
    pub async fn enqueue<P: Serialize>(
        &self,
        task: &TaskHandle<P>,
        payload: &P,
    ) -> Result<String, DeployError> {
        self.enqueue_with_id(task, payload, None).await
    }

    /// Like [`QueueHandle::enqueue`] but deduplicated by `id`: a message with
    /// the same ID that is still queued makes this a no-op
    pub async fn enqueue_with_id<P: Serialize>(
        &self,
        task: &TaskHandle<P>,
        payload: &P,
        id: Option<String>,
    ) -> Result<String, DeployError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeployError::QueueError(format!(
                "queue {} is closed",
                self.name
            )));
        }

        let payload = serde_json::to_value(payload)?;
        let message = Message::new(id, task.key(), payload);
        let id = message.id.clone();

        if self.backend.push(&self.name, message).await? {
            debug!(queue = %self.name, message_id = %id, "Enqueued {}", task.key());
        } else {
            debug!(queue = %self.name, message_id = %id, "Message already queued");
        }
        Ok(id)
    }

    /// Messages waiting or in flight
    pub async fn len(&self) -> Result<usize, DeployError> {
        self.backend.len(&self.name).await
    }

    pub async fn is_empty(&self) -> Result<bool, DeployError> {
        Ok(self.len().await? == 0)
    }
}

pub struct QueueFactory {
    backend: Arc<dyn QueueBackend>,
    queues: Mutex<HashMap<String, QueueOptions>>,
    tasks: Arc<TaskRegistry>,
    started: Mutex<Vec<String>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

impl QueueFactory {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            backend,
            queues: Mutex::new(HashMap::new()),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            started: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    /// Register a queue. Registering a known name returns its handle and
    /// keeps the options it was first registered with.
    pub fn register_queue(&self, options: QueueOptions) -> Result<QueueHandle, DeployError> {
        options.validate()?;

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&options.name) {
            debug!(queue = %options.name, "Queue already registered");
        } else {
            info!(
                queue = %options.name,
                "Registered queue (workers {}..={}, buffer {})",
                options.min_workers,
                options.max_workers,
                options.buffer_size
            );
            queues.insert(options.name.clone(), options.clone());
        }

        Ok(self.handle(&options.name))
    }

    /// Handle of an already registered queue
    pub fn queue(&self, name: &str) -> Option<QueueHandle> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.contains_key(name).then(|| self.handle(name))
    }

    fn handle(&self, name: &str) -> QueueHandle {
        QueueHandle {
            name: name.to_string(),
            backend: self.backend.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Bind a handler to a task name and version. The first registration
    /// wins.
    pub fn register_task<P, F, Fut>(&self, name: &str, version: u32, handler: F) -> TaskHandle<P>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(TaskContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DeployError>> + Send + 'static,
    {
        let key = task_key(name, version);
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());

        if tasks.contains_key(&key) {
            debug!("Task {} already registered", key);
        } else {
            let handler = Arc::new(handler);
            let task: TaskFn = Arc::new(move |ctx, value| {
                let handler = handler.clone();
                Box::pin(async move {
                    let payload: P = serde_json::from_value(value).map_err(|e| {
                        DeployError::QueueError(format!("undecodable payload: {}", e))
                    })?;
                    handler(ctx, payload).await
                })
            });
            tasks.insert(key.clone(), task);
            info!("Registered task {}", key);
        }

        TaskHandle {
            name: name.to_string(),
            version,
            _payload: PhantomData,
        }
    }

    /// Start worker pools for every registered queue not yet consuming
    pub fn start_consumers(&self) -> Result<(), DeployError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeployError::QueueError("queue factory is closed".to_string()));
        }

        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());

        for (name, options) in queues.iter() {
            if started.contains(name) {
                continue;
            }
            let consumer = Consumer {
                options: options.clone(),
                backend: self.backend.clone(),
                tasks: self.tasks.clone(),
                cancel: self.cancel.subscribe(),
            };
            consumers.push(tokio::spawn(consumer.run()));
            started.push(name.clone());
        }
        Ok(())
    }

    /// Stop accepting work and wait for in-flight handlers
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing queues...");
        self.cancel.send_replace(true);

        let consumers = {
            let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *consumers)
        };
        for consumer in consumers {
            if let Err(e) = consumer.await {
                error!("Queue consumer panicked: {}", e);
            }
        }
        info!("Queues closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
