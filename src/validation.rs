//! Input checks performed by callers before they reach the store.
//!
//! Lengths are counted in characters, not bytes.

/// Longest accepted message, in characters (after trimming)
pub const MAX_CONTENT_CHARS: usize = 500;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MAX_PASSWORD_CHARS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Content must be 1-{max} characters")]
    ContentLength { max: usize },

    #[error("username and password required")]
    MissingCredentials,

    #[error("Username is too long (maximum {max} characters)")]
    UsernameTooLong { max: usize },

    #[error("Password is too long (maximum {max} characters)")]
    PasswordTooLong { max: usize },
}

/// Trim `content` and check its length. Returns the trimmed text to store.
pub fn validate_content(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentLength {
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Check signup credentials. The username is kept verbatim (case-sensitive).
pub fn validate_credentials(username: &str, password: &str) -> Result<(), ValidationError> {
    if username.is_empty() || password.is_empty() {
        return Err(ValidationError::MissingCredentials);
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ValidationError::UsernameTooLong {
            max: MAX_USERNAME_CHARS,
        });
    }
    if password.chars().count() > MAX_PASSWORD_CHARS {
        return Err(ValidationError::PasswordTooLong {
            max: MAX_PASSWORD_CHARS,
        });
    }
    Ok(())
}
