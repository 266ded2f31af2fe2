//! Authentication result types
//!
//! Outcome of each step of the USER → PASS → ACCT handshake.

use crate::protocol::ReplyCode;

/// What the handshake expects next after a successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// 331
    NeedPassword,
    /// 332
    NeedAccount,
    /// 230; the session is identified
    Identified,
}

impl AuthStep {
    pub fn reply_code(self) -> ReplyCode {
        match self {
            AuthStep::NeedPassword => ReplyCode::NeedPassword,
            AuthStep::NeedAccount => ReplyCode::NeedAccount,
            AuthStep::Identified => ReplyCode::UserLoggedIn,
        }
    }
}
