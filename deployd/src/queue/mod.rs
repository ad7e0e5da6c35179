//! Asynchronous task queue
//!
//! Decouples request intake from pipeline execution. Delivery is
//! at-least-once: a message is removed only after its handler succeeds, so
//! handlers must tolerate running more than once.

pub mod backend;
pub mod consumer;
pub mod factory;
pub mod file;
pub mod message;
pub mod options;

pub use backend::{MemoryBackend, QueueBackend};
pub use factory::{QueueFactory, QueueHandle, TaskContext, TaskHandle};
pub use file::FileBackend;
pub use message::Message;
pub use options::QueueOptions;
