use thiserror::Error;

use crate::{
    db_types::ConnectionId,
    helpers::CipherError,
    traits::{ConnectionManagement, OrderManagement, TransactionManagement},
};

/// The complete storage backend for the bank sync engine.
#[allow(async_fn_in_trait)]
pub trait BankSyncDatabase: Clone + ConnectionManagement + TransactionManagement + OrderManagement {
    /// The URL of the database
    fn url(&self) -> &str;
}

#[derive(Debug, Clone, Error)]
pub enum BankSyncDatabaseError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("A live connection for {organizer} at {institution_id} already exists")]
    ConnectionAlreadyExists { organizer: String, institution_id: String },
    #[error("The requested connection {0} does not exist")]
    ConnectionNotFound(ConnectionId),
    #[error("No authorization attempt exists for the given state")]
    AttemptNotFound,
    #[error("The requested bank account (internal id {0}) does not exist")]
    AccountNotFound(i64),
    #[error("The requested transaction (internal id {0}) does not exist")]
    TransactionNotFound(i64),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(String),
    #[error("The requested payment (internal id {0}) does not exist")]
    PaymentNotFound(i64),
    #[error("Could not read or write the stored credential. {0}")]
    Credential(#[from] CipherError),
    #[error("Could not (de)serialize a stored value. {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for BankSyncDatabaseError {
    fn from(e: sqlx::Error) -> Self {
        BankSyncDatabaseError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for BankSyncDatabaseError {
    fn from(e: serde_json::Error) -> Self {
        BankSyncDatabaseError::Serialization(e.to_string())
    }
}
