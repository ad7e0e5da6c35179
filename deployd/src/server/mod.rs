//! HTTP intake

pub mod handlers;
pub mod serve;
pub mod state;
