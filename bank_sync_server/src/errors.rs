use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use bank_providers::ProviderError;
use bank_sync_engine::{
    lifecycle::LifecycleError,
    BankSyncDatabaseError,
    ConnectionApiError,
    ReviewError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("A valid X-Api-Key header is required")]
    Unauthorized,
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request conflicts with the current state. {0}")]
    Conflict(String),
    #[error("The bank could not be reached. {0}")]
    BankUnavailable(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BankUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<BankSyncDatabaseError> for ServerError {
    fn from(e: BankSyncDatabaseError) -> Self {
        match e {
            BankSyncDatabaseError::ConnectionNotFound(_)
            | BankSyncDatabaseError::AttemptNotFound
            | BankSyncDatabaseError::AccountNotFound(_)
            | BankSyncDatabaseError::TransactionNotFound(_)
            | BankSyncDatabaseError::OrderNotFound(_)
            | BankSyncDatabaseError::PaymentNotFound(_) => Self::NoRecordFound(e.to_string()),
            BankSyncDatabaseError::ConnectionAlreadyExists { .. } => Self::Conflict(e.to_string()),
            e => Self::BackendError(format!("Database error: {e}")),
        }
    }
}

impl From<ProviderError> for ServerError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidState(_) => Self::InvalidRequestBody(e.to_string()),
            ProviderError::AuthorizationDenied(_) => Self::Conflict(e.to_string()),
            e => Self::BankUnavailable(e.to_string()),
        }
    }
}

impl From<LifecycleError> for ServerError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Database(e) => e.into(),
            LifecycleError::Provider(e) => e.into(),
            LifecycleError::ConnectionNotFound(_) => Self::NoRecordFound(e.to_string()),
            LifecycleError::ProviderNotConfigured(_) => Self::InvalidRequestBody(e.to_string()),
            LifecycleError::Transition(_) | LifecycleError::NotUsable { .. } => Self::Conflict(e.to_string()),
            LifecycleError::WrongClaim { .. } => Self::BackendError(e.to_string()),
        }
    }
}

impl From<ConnectionApiError> for ServerError {
    fn from(e: ConnectionApiError) -> Self {
        match e {
            ConnectionApiError::DatabaseError(e) => e.into(),
            ConnectionApiError::LifecycleError(e) => e.into(),
            ConnectionApiError::ProviderError(e) => e.into(),
            ConnectionApiError::IllegalTransition(_) => Self::Conflict(e.to_string()),
            ConnectionApiError::InvalidState(_) | ConnectionApiError::MissingCode => {
                Self::InvalidRequestBody(e.to_string())
            },
            ConnectionApiError::AuthorizationDenied(_) => Self::Conflict(e.to_string()),
            ConnectionApiError::ConnectionNotFound(_) => Self::NoRecordFound(e.to_string()),
            ConnectionApiError::ConnectionRevoked(_) => Self::Conflict(e.to_string()),
        }
    }
}

impl From<ReviewError> for ServerError {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::DatabaseError(e) => e.into(),
            ReviewError::TransactionNotFound(_) | ReviewError::OrderNotFound(_) => Self::NoRecordFound(e.to_string()),
            ReviewError::NoOrders | ReviewError::AmbiguousOrder { .. } => Self::InvalidRequestBody(e.to_string()),
            ReviewError::SettlementError(_)
            | ReviewError::NotReviewable { .. }
            | ReviewError::OrderNotPayable { .. }
            | ReviewError::SplitMismatch { .. }
            | ReviewError::AlreadyPaid { .. } => Self::Conflict(e.to_string()),
        }
    }
}
