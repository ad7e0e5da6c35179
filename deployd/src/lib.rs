//! deployd library
//!
//! Deployment orchestration for self-hosted applications: request intake,
//! a durable task queue, the clone/build/replace pipeline and the container
//! engine plumbing it runs on.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod server;
pub mod source;
pub mod storage;
pub mod utils;
pub mod workers;

#[cfg(test)]
pub mod testing;
