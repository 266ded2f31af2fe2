//! Server core functionality
//!
//! This module contains the listener, the shared per-process context handed
//! to every control connection, and TLS material loading.

pub mod context;
pub mod core;
pub mod tls;

pub use context::{ServerContext, SessionSlot};
pub use core::Server;
pub use tls::load_tls_acceptor;
