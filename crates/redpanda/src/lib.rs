//! Redpanda transport for compressed usage reports.

pub mod config;
pub mod connect;
pub mod consumer;
pub mod health;
pub mod memory;
pub mod producer;

pub use config::*;
pub use consumer::*;
pub use memory::MemoryQueue;
pub use producer::*;
