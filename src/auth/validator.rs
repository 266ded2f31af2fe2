//! Authentication input validation
//!
//! Sanity checks applied to USER/PASS/ACCT arguments before any lookup.

use crate::error::AuthError;

pub const MAX_CREDENTIAL_LENGTH: usize = 128;

/// Performs basic input sanitation to check for malicious or malformed input.
fn is_valid_input(input: &str) -> bool {
    !input.trim().is_empty()
        && input.len() <= MAX_CREDENTIAL_LENGTH
        && !input.contains(['\r', '\n', '\0'])
}

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    if !is_valid_input(username) || username.contains(['/', '\\']) {
        return Err(AuthError::MalformedInput("Invalid username format".into()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if !is_valid_input(password) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }
    Ok(())
}

pub fn validate_account(account: &str) -> Result<(), AuthError> {
    if !is_valid_input(account) || account.contains(['/', '\\']) {
        return Err(AuthError::MalformedInput("Invalid account format".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_input() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("../root").is_err());
        assert!(validate_password("pa\0ss").is_err());
        assert!(validate_account(&"a".repeat(MAX_CREDENTIAL_LENGTH + 1)).is_err());
    }
}
