//! Push delivery of response-stream messages.
//!
//! Delivery is best-effort and at-most-once towards the client: a push to a
//! key with no live connection is acknowledged and forgotten. Only failures
//! of the push layer itself are retried.

pub mod dispatcher;

pub use dispatcher::{PushChannel, ResponseDispatcher};
