use thiserror::Error;

use crate::state_token::StateTokenError;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Could not initialize provider client: {0}")]
    Initialization(String),
    #[error("Temporary provider failure: {0}")]
    Transient(String),
    #[error("Provider rejected our credentials: {0}")]
    Unauthorized(String),
    #[error("Provider refused to refresh the grant: {0}")]
    RefreshRejected(String),
    #[error("The account holder did not grant access: {0}")]
    AuthorizationDenied(String),
    #[error("Invalid authorization state: {0}")]
    InvalidState(String),
    #[error("Account is not available: {0}")]
    AccountUnavailable(String),
    #[error("Provider request failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Could not deserialize provider response: {0}")]
    JsonError(String),
    #[error("Provider sent unusable data: {0}")]
    InvalidData(String),
}

impl ProviderError {
    /// Network failures, timeouts, throttling and 5xx responses. Only these are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The credential material can no longer be used without the account holder's involvement.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::RefreshRejected(_))
    }
}

impl From<StateTokenError> for ProviderError {
    fn from(e: StateTokenError) -> Self {
        Self::InvalidState(e.to_string())
    }
}
