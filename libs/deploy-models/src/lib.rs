//! Shared data model for the deployd orchestrator
//!
//! Records persisted by the store and carried through the task queue.

pub mod models;
