//! Queue messages, producers and the ack/retry policy.
//!
//! - `envelope`: the wire unit carried in stream records
//! - `topics`: typed request and response kinds
//! - `producer`: `RequestEnqueuer` and `ResponseEnqueuer`
//! - `retry`: `AckRetryManager`, settling every consumed record

pub mod envelope;
pub mod producer;
pub mod retry;
pub mod topics;

pub use envelope::{record_priority, Envelope, Payload, Priority};
pub use producer::{RequestEnqueuer, ResponseEnqueuer};
pub use retry::{AckRetryManager, Disposition, RetryPolicy};
pub use topics::{
    AiRequest, EmbeddingItem, PushKey, RequestTopic, ResponseMessage, ResponseTopic, SessionState,
};
