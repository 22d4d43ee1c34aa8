//! # Storage interfaces
//!
//! These traits define what a storage backend has to provide for the bank sync engine to work.
//!
//! * [`ConnectionManagement`] covers authorization attempts, bank connections, their (encrypted) credentials, the
//!   bank accounts under each connection and the per-account sync cursors.
//! * [`TransactionManagement`] stores fetched bank transactions along with their reconciliation state.
//! * [`OrderManagement`] is the slice of the host platform the engine needs: looking up orders awaiting payment and
//!   creating and confirming payments. Payment creation is idempotent on (connection, transaction id, order), and so
//!   is booking an outgoing transaction as a refund.
//! * [`BankSyncDatabase`] ties them together.
//!
//! The SQLite backend in this crate implements all of them.
mod bank_sync_database;
mod connection_management;
mod data_objects;
mod order_management;
mod transaction_management;

pub use bank_sync_database::{BankSyncDatabase, BankSyncDatabaseError};
pub use connection_management::ConnectionManagement;
pub use data_objects::{InsertPaymentResult, InsertTransactionResult, PaymentConfirmation, RefundRecording};
pub use order_management::OrderManagement;
pub use transaction_management::TransactionManagement;
