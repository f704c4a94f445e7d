//! AI request processing.
//!
//! [`MessageProcessor`] is the request-side [`MessageHandler`]: it turns
//! envelopes into calls on the downstream services in [`services`] and
//! reports progress through the response stream.
//!
//! [`MessageHandler`]: crate::scheduler::MessageHandler

pub mod message_processor;
pub mod services;

pub use message_processor::MessageProcessor;
pub use services::{ChatService, EmbeddingCache, Question, SessionService};
