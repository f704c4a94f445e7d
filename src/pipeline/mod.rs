//! Pipeline assembly.
//!
//! [`QueuePipeline`] owns everything that runs in the background:
//!
//! - the request-side [`PriorityScheduler`](crate::scheduler::PriorityScheduler)
//!   feeding the [`MessageProcessor`](crate::processor::MessageProcessor)
//! - the response-side scheduler feeding the
//!   [`ResponseDispatcher`](crate::delivery::ResponseDispatcher), on its own pool
//! - the [`StreamMonitor`](crate::monitor::StreamMonitor)
//!
//! # Example
//!
//! ```rust,ignore
//! use interview_queue::pipeline::{Collaborators, QueuePipeline};
//! use interview_queue::QueueConfig;
//!
//! let config = QueueConfig::from_env()?;
//! let pipeline = QueuePipeline::connect(config, Collaborators {
//!     chat, sessions, embeddings, push,
//! }).await?;
//!
//! pipeline.start().await?;
//! pipeline.requests().request_opening_question(42, 7).await?;
//! // ...
//! pipeline.shutdown().await?;
//! ```

pub mod orchestrator;

pub use orchestrator::{Collaborators, PipelineError, QueuePipeline};
