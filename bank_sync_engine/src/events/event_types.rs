use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{BankConnection, ConnectionId, Order, Payment, TransactionRecord};

/// A bank transaction was booked against an order and the payment confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmedEvent {
    pub payment: Payment,
    pub order: Order,
    pub transaction: TransactionRecord,
    /// True if an admin approved the match
    pub manual: bool,
}

/// The connection's grant is gone. The organizer has to go through the bank's redirect flow again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReauthorizationRequiredEvent {
    pub connection: BankConnection,
    pub reason: String,
}

/// The account holder's consent runs out soon. Emitted at most once per warning interval per connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentExpiringEvent {
    pub connection: BankConnection,
    pub expires_at: DateTime<Utc>,
}

/// Sync has failed too many times in a row for this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailureEscalatedEvent {
    pub connection_id: ConnectionId,
    pub organizer: String,
    pub consecutive_failures: i64,
    pub last_error: String,
}
