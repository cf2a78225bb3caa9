//! Hivemoji ingestion: payload dispatch, block following and chunk cleanup.

pub mod config;
pub mod error;
pub mod follower;
pub mod logging;
pub mod processor;
pub mod shutdown;
pub mod sweeper;
