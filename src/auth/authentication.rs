//! Authentication state machine
//!
//! `Unauthenticated → UserGiven → PasswordGiven → Identified`. A rejected step
//! leaves the state exactly as it was.

use log::info;

use crate::auth::business::BusinessHandler;
use crate::auth::results::AuthStep;
use crate::auth::validator::{validate_account, validate_password, validate_username};
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    UserGiven,
    PasswordGiven,
    Identified,
}

/// Per-session login state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authentication {
    phase: AuthPhase,
    user: Option<String>,
    account: Option<String>,
    root: Option<String>,
    admin: bool,
}

impl Authentication {
    /// USER. Restarts the handshake on success.
    pub fn set_user(
        &mut self,
        business: &dyn BusinessHandler,
        user: &str,
    ) -> Result<AuthStep, AuthError> {
        validate_username(user)?;
        let step = business.check_user(user)?;

        self.clear();
        self.user = Some(user.to_string());
        match step {
            AuthStep::Identified => Ok(self.identify(business, user, None)),
            _ => {
                self.phase = AuthPhase::UserGiven;
                Ok(AuthStep::NeedPassword)
            }
        }
    }

    /// PASS. Only legal right after an accepted USER.
    pub fn set_password(
        &mut self,
        business: &dyn BusinessHandler,
        password: &str,
    ) -> Result<AuthStep, AuthError> {
        let user = match (self.phase, &self.user) {
            (AuthPhase::UserGiven, Some(user)) => user.clone(),
            _ => return Err(AuthError::InvalidState("login with USER first".into())),
        };
        validate_password(password)?;

        match business.check_password(&user, password)? {
            AuthStep::NeedAccount => {
                self.phase = AuthPhase::PasswordGiven;
                Ok(AuthStep::NeedAccount)
            }
            _ => Ok(self.identify(business, &user, None)),
        }
    }

    /// ACCT. Only legal once the password was accepted and an account is pending.
    pub fn set_account(
        &mut self,
        business: &dyn BusinessHandler,
        account: &str,
    ) -> Result<AuthStep, AuthError> {
        let user = match (self.phase, &self.user) {
            (AuthPhase::PasswordGiven, Some(user)) => user.clone(),
            (AuthPhase::Identified, _) => {
                return Err(AuthError::InvalidState("already logged in".into()));
            }
            _ => return Err(AuthError::InvalidState("login with USER and PASS first".into())),
        };
        validate_account(account)?;
        business.check_account(&user, account)?;
        Ok(self.identify(business, &user, Some(account)))
    }

    fn identify(
        &mut self,
        business: &dyn BusinessHandler,
        user: &str,
        account: Option<&str>,
    ) -> AuthStep {
        let root = business
            .root_override(user, account)
            .unwrap_or_else(|| derive_root(user, account));
        self.admin = business.is_admin(user, account);
        self.account = account.map(str::to_string);
        self.root = Some(root);
        self.phase = AuthPhase::Identified;
        info!(
            "User {} identified (account: {}, admin: {})",
            user,
            account.unwrap_or("-"),
            self.admin
        );
        AuthStep::Identified
    }

    /// Forget everything. Safe to call repeatedly and on a fresh session.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_identified(&self) -> bool {
        self.phase == AuthPhase::Identified
    }

    pub fn is_admin(&self) -> bool {
        self.is_identified() && self.admin
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Business root, set once identified
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }
}

fn derive_root(user: &str, account: Option<&str>) -> String {
    match account {
        Some(account) => format!("/{user}/{account}"),
        None => format!("/{user}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::business::DefaultBusinessHandler;
    use crate::config::UserConfig;
    use std::path::PathBuf;

    fn business() -> DefaultBusinessHandler {
        DefaultBusinessHandler::new(
            &[
                UserConfig {
                    name: "alice".into(),
                    password: "secret".into(),
                    accounts: vec!["acc1".into()],
                    ..Default::default()
                },
                UserConfig {
                    name: "bob".into(),
                    password: "hunter2".into(),
                    admin: true,
                    ..Default::default()
                },
                UserConfig {
                    name: "carol".into(),
                    password: "pw".into(),
                    root: Some("/shared".into()),
                    ..Default::default()
                },
            ],
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn full_handshake_with_account() {
        let business = business();
        let mut auth = Authentication::default();
        assert_eq!(auth.set_user(&business, "alice").unwrap(), AuthStep::NeedPassword);
        assert_eq!(auth.set_password(&business, "secret").unwrap(), AuthStep::NeedAccount);
        assert!(!auth.is_identified());
        assert_eq!(auth.set_account(&business, "acc1").unwrap(), AuthStep::Identified);
        assert!(auth.is_identified());
        assert_eq!(auth.root(), Some("/alice/acc1"));
        assert!(!auth.is_admin());
    }

    #[test]
    fn password_alone_identifies_account_less_user() {
        let business = business();
        let mut auth = Authentication::default();
        auth.set_user(&business, "bob").unwrap();
        assert_eq!(auth.set_password(&business, "hunter2").unwrap(), AuthStep::Identified);
        assert_eq!(auth.root(), Some("/bob"));
        assert!(auth.is_admin());
    }

    #[test]
    fn business_root_override() {
        let business = business();
        let mut auth = Authentication::default();
        auth.set_user(&business, "carol").unwrap();
        auth.set_password(&business, "pw").unwrap();
        assert_eq!(auth.root(), Some("/shared"));
    }

    #[test]
    fn rejected_steps_do_not_mutate() {
        let business = business();
        let mut auth = Authentication::default();
        assert!(auth.set_password(&business, "secret").is_err());
        assert_eq!(auth, Authentication::default());

        auth.set_user(&business, "alice").unwrap();
        let before = auth.clone();
        assert!(auth.set_password(&business, "wrong").is_err());
        assert_eq!(auth, before);
        assert!(auth.set_user(&business, "mallory").is_err());
        assert_eq!(auth, before);

        auth.set_password(&business, "secret").unwrap();
        let before = auth.clone();
        assert!(auth.set_account(&business, "nope").is_err());
        assert_eq!(auth, before);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut auth = Authentication::default();
        auth.clear();
        auth.clear();
        assert_eq!(auth, Authentication::default());
        assert_eq!(auth.phase(), AuthPhase::Unauthenticated);
    }
}
