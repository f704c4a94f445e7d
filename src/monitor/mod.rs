//! Stream health monitoring and recovery tooling.
//!
//! The monitor runs three independent duties on their own schedule:
//!
//! - depth sampling, which warns above a threshold and feeds the gauges
//! - trimming by age and retained count, never past a pending entry
//! - consumer-group checks that recreate a group deleted from outside
//!
//! Operator actions (health snapshot, forced check, bulk acknowledgment,
//! group reset, requeue of stale pending entries) are plain async methods
//! on [`StreamMonitor`] and are exposed through the CLI.

pub mod health;
pub mod stream_monitor;

pub use health::{GroupInfo, HealthSnapshot, RequeueReport, StreamInfo, TrimReport};
pub use stream_monitor::StreamMonitor;
