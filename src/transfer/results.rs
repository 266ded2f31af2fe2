//! Transfer result types
//!
//! Values returned by data-channel setup and by finished transfers.

use std::net::SocketAddr;
use std::time::Duration;

/// Result of entering passive mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveModeResult {
    /// Socket the data listener is bound to
    pub bound: SocketAddr,
    /// Address announced to the client
    pub published: SocketAddr,
}

/// Summary of a finished transfer, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Average rate in bytes per second
    pub fn rate(&self) -> u64 {
        let millis = self.elapsed.as_millis().max(1) as u64;
        self.bytes.saturating_mul(1000) / millis
    }
}
