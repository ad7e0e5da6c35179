//! Filesystem helpers for the file-backed store and queue spool

pub mod dir;
pub mod file;
