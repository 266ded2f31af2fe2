//! Restart markers
//!
//! The REST offset pending for the next transfer.

use crate::error::TransferError;
use crate::transfer::modes::{TransferMode, TransferStructure};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Restart {
    marker: Option<u64>,
}

impl Restart {
    /// Only File structure in Stream mode can restart.
    pub fn set_marker(
        &mut self,
        offset: u64,
        mode: TransferMode,
        structure: TransferStructure,
    ) -> Result<(), TransferError> {
        if mode != TransferMode::Stream || structure != TransferStructure::File {
            self.marker = None;
            return Err(TransferError::RestartNotSupported);
        }
        self.marker = Some(offset);
        Ok(())
    }

    pub fn marker(&self) -> Option<u64> {
        self.marker
    }

    /// Consume the pending offset (0 when none)
    pub fn take(&mut self) -> u64 {
        self.marker.take().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.marker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_consumed_once() {
        let mut restart = Restart::default();
        restart
            .set_marker(42, TransferMode::Stream, TransferStructure::File)
            .unwrap();
        assert_eq!(restart.marker(), Some(42));
        assert_eq!(restart.take(), 42);
        assert_eq!(restart.take(), 0);
    }

    #[test]
    fn only_file_stream_restarts() {
        let mut restart = Restart::default();
        assert!(matches!(
            restart.set_marker(1, TransferMode::Block, TransferStructure::File),
            Err(TransferError::RestartNotSupported)
        ));
        assert!(restart
            .set_marker(1, TransferMode::Stream, TransferStructure::Record)
            .is_err());
        assert_eq!(restart.marker(), None);
    }
}
