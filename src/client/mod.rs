//! Client management system
//!
//! Handles control connections, per-session state, and the control transport.

pub mod handler;
pub mod state;
pub mod stream;

pub use handler::handle_client;
pub use state::Session;
pub use stream::ControlStream;
