//! Error handlers
//!
//! Converts command errors into the single reply the client receives.

use log::{debug, warn};

use crate::error::types::CommandError;
use crate::protocol::{Reply, ReplyCode};

/// Convert a command error into its FTP reply
pub fn error_to_reply(err: &CommandError) -> Reply {
    match err.code() {
        ReplyCode::LocalError | ReplyCode::ServiceNotAvailable => {
            warn!("Command failed: {}", err);
        }
        _ => debug!("Command rejected: {}", err),
    }
    Reply::new(err.code(), err.message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, StorageError, TransferError};

    #[test]
    fn auth_failures_hide_which_credential_failed() {
        let reply = error_to_reply(&AuthError::InvalidPassword("alice".into()).into());
        assert_eq!(reply.code(), ReplyCode::NotLoggedIn);
        assert_eq!(reply.text(), "Login incorrect");
    }

    #[test]
    fn storage_and_transfer_families() {
        let missing: CommandError = StorageError::FileNotFound("a.txt".into()).into();
        assert_eq!(missing.code(), ReplyCode::FileUnavailable);

        let traversal: CommandError = StorageError::PathTraversal("../etc".into()).into();
        assert_eq!(traversal.code(), ReplyCode::FileNameNotAllowed);

        let timeout: CommandError =
            TransferError::ConnectionTimeout(std::time::Duration::from_secs(1)).into();
        assert_eq!(timeout.code(), ReplyCode::CantOpenDataConnection);

        let aborted: CommandError = TransferError::Aborted.into();
        assert_eq!(aborted.code(), ReplyCode::ConnectionClosed);
    }
}
