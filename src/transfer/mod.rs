//! Transfer module for FTP server
//!
//! Data channel management (active/passive addressing, the passive port pool,
//! the session reference table) and execution of block-by-block transfers.

pub mod address;
pub mod data_channel;
pub mod file_ops;
pub mod modes;
pub mod operations;
pub mod port_allocator;
pub mod restart;
pub mod results;
pub mod session_reference;

pub use data_channel::{DataConnection, DataResources, DataStream, PendingData};
pub use file_ops::{DataSource, TransferJob, TransferOutcome};
pub use modes::{TransferMode, TransferStructure, TransferType};
pub use operations::{TransferControl, TransferState};
pub use port_allocator::PassivePortAllocator;
pub use restart::Restart;
pub use results::{PassiveModeResult, TransferReport};
pub use session_reference::{Registration, SessionKey, SessionRef, SessionReferenceTable};
