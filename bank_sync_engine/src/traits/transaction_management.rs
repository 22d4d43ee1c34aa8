use bank_providers::RawTransaction;

use crate::{
    db_types::{NewTransactionRecord, TransactionQueryFilter, TransactionRecord, TransactionState, TransactionUpdate},
    traits::{BankSyncDatabaseError, InsertTransactionResult},
};

#[allow(async_fn_in_trait)]
pub trait TransactionManagement {
    /// Stores the transaction unless one with the same external id already exists for the connection, in which case
    /// the stored record is returned untouched.
    async fn insert_transaction(
        &self,
        transaction: NewTransactionRecord,
    ) -> Result<InsertTransactionResult, BankSyncDatabaseError>;

    async fn fetch_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, BankSyncDatabaseError>;

    /// Replaces a `Pending` record's details with its booked version and moves it to `Unchecked`.
    async fn promote_pending_transaction(
        &self,
        id: i64,
        booked: &RawTransaction,
    ) -> Result<TransactionRecord, BankSyncDatabaseError>;

    async fn update_transaction_state(
        &self,
        id: i64,
        state: TransactionState,
        update: TransactionUpdate,
    ) -> Result<TransactionRecord, BankSyncDatabaseError>;

    /// Applies the update only if the transaction is currently in one of the `from` states. Returns `None` if it is
    /// not, e.g. because a concurrent caller changed it first.
    async fn transition_transaction_state(
        &self,
        id: i64,
        from: &[TransactionState],
        state: TransactionState,
        update: TransactionUpdate,
    ) -> Result<Option<TransactionRecord>, BankSyncDatabaseError>;

    /// Transactions matching the filter, newest first.
    async fn search_transactions(
        &self,
        filter: TransactionQueryFilter,
    ) -> Result<Vec<TransactionRecord>, BankSyncDatabaseError>;
}
