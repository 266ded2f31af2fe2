//! Credential storage and management
//!
//! User table built from the `[[users]]` section of the configuration.

use std::collections::HashMap;

use crate::config::UserConfig;
use crate::error::AuthError;

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, UserConfig>,
}

impl CredentialStore {
    pub fn new(users: &[UserConfig]) -> Self {
        Self {
            users: users
                .iter()
                .map(|user| (user.name.clone(), user.clone()))
                .collect(),
        }
    }

    pub fn get(&self, user: &str) -> Result<&UserConfig, AuthError> {
        self.users
            .get(user)
            .ok_or_else(|| AuthError::UserNotFound(user.to_string()))
    }

    pub fn verify_password(&self, user: &str, password: &str) -> Result<&UserConfig, AuthError> {
        let record = self.get(user)?;
        if record.password == password {
            Ok(record)
        } else {
            Err(AuthError::InvalidPassword(user.to_string()))
        }
    }

    pub fn verify_account(&self, user: &str, account: &str) -> Result<(), AuthError> {
        let record = self.get(user)?;
        if record.accounts.iter().any(|a| a == account) {
            Ok(())
        } else {
            Err(AuthError::InvalidAccount {
                user: user.to_string(),
                account: account.to_string(),
            })
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
