use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by the mail API abstraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// The access token was missing, expired or rejected by Gmail.
    #[error("Invalid credentials: {0}")]
    Unauthorized(String),
    /// The resource already exists (HTTP 409).
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Api(String),
}

/// Start-up failure. Fatal for the current run.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to read application secret '{path}': {reason}")]
    Secret { path: PathBuf, reason: String },
    #[error("Error initializing Gmail API client: {0}")]
    ApiClient(String),
    #[error("Error initializing token client: {0}")]
    TokenClient(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("No access token found. Please login again.")]
    MissingCredential,
    #[error("Session expired, please login again: {0}")]
    CredentialRejected(String),
    #[error("{0}")]
    Operation(String),
}

impl AppError {
    /// True for the errors that invalidate the session and send the user
    /// back to the login view.
    pub fn is_credential(&self) -> bool {
        matches!(
            self,
            AppError::MissingCredential | AppError::CredentialRejected(_)
        )
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Unauthorized(msg) => AppError::CredentialRejected(msg),
            MailError::Conflict(msg) | MailError::Api(msg) => AppError::Operation(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("{0}")]
    Denied(String),
    #[error("Token response did not contain an access token")]
    NoToken,
}
