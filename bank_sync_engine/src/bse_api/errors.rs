use bank_providers::ProviderError;
use thiserror::Error;

use crate::{
    db_types::{ConnectionId, OrderStatus, TransactionState},
    lifecycle::{IllegalTransition, LifecycleError},
    sync::SettlementError,
    traits::BankSyncDatabaseError,
};

#[derive(Debug, Clone, Error)]
pub enum ConnectionApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] BankSyncDatabaseError),
    #[error("{0}")]
    LifecycleError(#[from] LifecycleError),
    #[error("{0}")]
    ProviderError(#[from] ProviderError),
    #[error("{0}")]
    IllegalTransition(#[from] IllegalTransition),
    #[error("Invalid authorization state. {0}")]
    InvalidState(String),
    #[error("Bank access was not granted. {0}")]
    AuthorizationDenied(String),
    #[error("The authorization callback did not include a code")]
    MissingCode,
    #[error("Connection {0} does not exist")]
    ConnectionNotFound(ConnectionId),
    #[error("Connection {0} has been revoked. Start a new authorization instead.")]
    ConnectionRevoked(ConnectionId),
}

#[derive(Debug, Clone, Error)]
pub enum ReviewError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] BankSyncDatabaseError),
    #[error("{0}")]
    SettlementError(#[from] SettlementError),
    #[error("Transaction {0} does not exist")]
    TransactionNotFound(i64),
    #[error("Transaction {id} is {state} and cannot be reviewed")]
    NotReviewable { id: i64, state: TransactionState },
    #[error("At least one order must be given")]
    NoOrders,
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Order {code} is {status:?} and cannot take payments")]
    OrderNotPayable { code: String, status: OrderStatus },
    #[error("The orders are owed {owed} in total, but the transaction is for {amount}")]
    SplitMismatch { owed: String, amount: String },
    #[error("Order code {code} is used by several events ({events}). Give it as EVENT/CODE.")]
    AmbiguousOrder { code: String, events: String },
    #[error("Transaction {id} has already paid {orders}")]
    AlreadyPaid { id: i64, orders: String },
}
