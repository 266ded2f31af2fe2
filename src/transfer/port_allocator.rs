//! Passive port allocation
//!
//! Hands out ports from an inclusive range in circular order. The allocator
//! never blocks and never runs dry; whoever binds the port detects reuse.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::TransferError;

#[derive(Debug)]
pub struct PassivePortAllocator {
    min: u32,
    max: u32,
    current: AtomicU32,
}

impl PassivePortAllocator {
    pub fn new(min: u16, max: u16) -> Result<Self, TransferError> {
        if min == 0 || min > max {
            return Err(TransferError::InvalidPortRange(min, max));
        }
        Ok(Self {
            min: min as u32,
            max: max as u32,
            current: AtomicU32::new(min as u32),
        })
    }

    /// Next candidate port, wrapping from `max` back to `min`.
    pub fn next_port(&self) -> u16 {
        let advance = |current: u32| {
            Some(if current >= self.max {
                self.min
            } else {
                current + 1
            })
        };
        let port = match self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, advance)
        {
            Ok(previous) | Err(previous) => previous,
        };
        port as u16
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min as u16, self.max as u16)
    }
}
