//! Error handling
//!
//! Defines error types and their mapping onto FTP reply codes.

pub mod handlers;
pub mod types;

pub use handlers::error_to_reply;
pub use types::*;
