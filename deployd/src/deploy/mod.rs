//! Build and container replacement

pub mod atomic;
pub mod builder;
pub mod engine;
pub mod fsm;
pub mod locks;
pub mod ports;
pub mod tracker;
pub mod variables;
