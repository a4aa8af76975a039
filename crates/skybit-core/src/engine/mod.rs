//! Scheduling engine: trigger clock and the worker pool it dispatches to.

pub mod trigger_engine;
pub mod worker_pool;

pub use trigger_engine::{ClockHandle, TriggerEngine, TriggerEngineConfig, TriggerHandler};
pub use worker_pool::{PoolClosed, WorkerPool, WorkerPoolConfig};
