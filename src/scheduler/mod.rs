//! Priority-lane consumers with bounded worker pools.
//!
//! The same machinery drives both sides of the pipeline: the request stream
//! feeds the AI message processor, the response stream feeds push delivery.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │   stream + consumer group     │
//!                 └───┬──────────┬──────────┬────┘
//!                     │          │          │      read_new (shared cursor)
//!                ┌────▼───┐ ┌────▼───┐ ┌────▼───┐
//!                │  high  │ │ medium │ │  low   │  lanes, own cadence + batch
//!                └────┬───┘ └────┬───┘ └────┬───┘
//!                     │   ◀── Handoff ──▶   │      foreign priorities parked (bounded)
//!                     └──────────┼──────────┘
//!                         ┌──────▼───────┐
//!                         │  WorkerPool  │         bounded, rejects when full
//!                         └──────┬───────┘
//!                         ┌──────▼───────┐
//!                         │MessageHandler│ ──▶ AckRetryManager
//!                         └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new("ai-processor", 5)));
//! let acks = AckRetryManager::new(store.clone(), "ai:requests", "ai-service-group", policy);
//! let scheduler = PriorityScheduler::new(scheduler_config, store, handler, acks, pool);
//!
//! scheduler.start().await?;
//! // ...
//! scheduler.shutdown().await?;
//! ```

pub mod lane;
pub mod poller;
pub mod worker_pool;

pub use lane::{Handoff, Lane, ReadReservation};
pub use poller::{MessageHandler, PriorityScheduler, SchedulerConfig, SchedulerError};
pub use worker_pool::{PoolError, PoolSlot, PoolStats, WorkerPool, WorkerPoolConfig};
