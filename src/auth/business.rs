//! Business handler
//!
//! The pluggable policy the dispatcher consults: credential checks, root
//! derivation, admin capability, per-command hooks and per-session factories.

use std::path::PathBuf;

use crate::auth::authentication::Authentication;
use crate::auth::credentials::CredentialStore;
use crate::auth::results::AuthStep;
use crate::client::Session;
use crate::config::UserConfig;
use crate::error::{AuthError, CommandError};
use crate::protocol::{Command, CommandCode, Reply};
use crate::storage::{FtpDirectory, LocalDirectory};
use crate::transfer::Restart;

const TOP_LEVEL_HELP: &str = "ABOR ACCT ALLO APPE AUTH CCC CDUP CWD DELE EPRT EPSV FEAT HELP LIST \
MKD MODE NLST NOOP OPTS PASS PASV PBSZ PORT PROT PWD QUIT REIN REST RETR RMD RNFR RNTO SITE \
SIZE STAT STOR STOU STRU SYST TYPE USER";

pub trait BusinessHandler: Send + Sync {
    /// USER lookup: `NeedPassword`, or `Identified` for password-less users
    fn check_user(&self, user: &str) -> Result<AuthStep, AuthError>;

    /// PASS check: `NeedAccount` or `Identified`
    fn check_password(&self, user: &str, password: &str) -> Result<AuthStep, AuthError>;

    fn check_account(&self, user: &str, account: &str) -> Result<(), AuthError>;

    /// Replaces the derived `/user[/account]` root when `Some`
    fn root_override(&self, _user: &str, _account: Option<&str>) -> Option<String> {
        None
    }

    fn is_admin(&self, user: &str, account: Option<&str>) -> bool;

    /// Runs after sequencing and login checks, right before the handler.
    /// An error here becomes the command's reply.
    fn before_run_command(&self, _session: &Session, _command: &Command) -> Result<(), CommandError> {
        Ok(())
    }

    fn after_run_command(&self, _session: &Session, _command: &Command, _reply: &Reply) {}

    /// Lines of the 214 reply for `HELP [arg]` and `SITE HELP`
    fn help_message(&self, arg: &str) -> Vec<String>;

    fn new_authentication(&self) -> Authentication {
        Authentication::default()
    }

    fn new_directory(&self) -> Box<dyn FtpDirectory>;

    fn new_restart(&self) -> Restart {
        Restart::default()
    }
}

/// Config-backed handler used by the server binary
#[derive(Debug, Clone)]
pub struct DefaultBusinessHandler {
    credentials: CredentialStore,
    server_root: PathBuf,
}

impl DefaultBusinessHandler {
    pub fn new(users: &[UserConfig], server_root: PathBuf) -> Self {
        Self {
            credentials: CredentialStore::new(users),
            server_root,
        }
    }
}

impl BusinessHandler for DefaultBusinessHandler {
    fn check_user(&self, user: &str) -> Result<AuthStep, AuthError> {
        self.credentials.get(user)?;
        Ok(AuthStep::NeedPassword)
    }

    fn check_password(&self, user: &str, password: &str) -> Result<AuthStep, AuthError> {
        let record = self.credentials.verify_password(user, password)?;
        if record.accounts.is_empty() {
            Ok(AuthStep::Identified)
        } else {
            Ok(AuthStep::NeedAccount)
        }
    }

    fn check_account(&self, user: &str, account: &str) -> Result<(), AuthError> {
        self.credentials.verify_account(user, account)
    }

    fn root_override(&self, user: &str, _account: Option<&str>) -> Option<String> {
        self.credentials
            .get(user)
            .ok()
            .and_then(|record| record.root.clone())
    }

    fn is_admin(&self, user: &str, _account: Option<&str>) -> bool {
        self.credentials
            .get(user)
            .map(|record| record.admin)
            .unwrap_or(false)
    }

    fn help_message(&self, arg: &str) -> Vec<String> {
        let arg = arg.trim();
        if arg.is_empty() {
            return vec![
                "The following commands are recognized:".to_string(),
                TOP_LEVEL_HELP.to_string(),
                "Help OK".to_string(),
            ];
        }
        if arg.eq_ignore_ascii_case("SITE") {
            return vec![
                "SITE commands:".to_string(),
                "INTERNALSHUTDOWN <password>".to_string(),
                "LIMITBANDWIDTH [<write> <read> [<session write> <session read>]]".to_string(),
                "HELP".to_string(),
                "Help OK".to_string(),
            ];
        }
        match CommandCode::from_verb(arg) {
            CommandCode::Unknown => vec![format!("Unknown command {}", arg.to_ascii_uppercase())],
            code => vec![format!("Syntax: {}", code.verb())],
        }
    }

    fn new_directory(&self) -> Box<dyn FtpDirectory> {
        Box::new(LocalDirectory::new(self.server_root.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_commands() {
        let business = DefaultBusinessHandler::new(&[], PathBuf::from("/tmp"));
        assert!(business.help_message("")[1].contains("RETR"));
        assert!(business.help_message("site")[2].starts_with("LIMITBANDWIDTH"));
        assert_eq!(business.help_message("retr"), vec!["Syntax: RETR".to_string()]);
    }

    #[test]
    fn unknown_user_rejected() {
        let business = DefaultBusinessHandler::new(&[], PathBuf::from("/tmp"));
        assert!(matches!(
            business.check_user("ghost"),
            Err(AuthError::UserNotFound(_))
        ));
        assert!(!business.is_admin("ghost", None));
    }
}
