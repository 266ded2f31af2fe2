//! Authentication system
//!
//! Login state machine, the business handler policy seam, and the
//! config-backed credential store.

pub mod authentication;
pub mod business;
pub mod credentials;
pub mod results;
pub mod validator;

pub use authentication::{AuthPhase, Authentication};
pub use business::{BusinessHandler, DefaultBusinessHandler};
pub use credentials::CredentialStore;
pub use results::AuthStep;
