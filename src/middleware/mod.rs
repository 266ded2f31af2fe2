//! Server middleware
//!
//! Provides logging and bandwidth shaping.

pub mod logging;
pub mod rate_limit;

pub use rate_limit::{ReadGate, ThroughputMonitor, TrafficShaper};
