//! interview-queue: asynchronous AI processing over Redis Streams.
//!
//! Requests for AI work are appended to a request stream, consumed by
//! priority lanes and handled by the message processor; results travel
//! through a separate response stream to the client push layer. A stream
//! monitor samples depth, trims and heals consumer groups.

// Core modules
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod scheduler;
pub mod stream;

pub use config::{ConfigError, QueueConfig};
pub use error::{
    CollaboratorError, EnqueueError, EnvelopeError, ProcessingError, PushError, StoreError,
};
pub use pipeline::{Collaborators, PipelineError, QueuePipeline};
