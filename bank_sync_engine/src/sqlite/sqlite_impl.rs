//! `SqliteDatabase` is the concrete storage backend for the bank sync engine.
//!
//! It implements all the traits in [`crate::traits`]. Credentials are sealed with the [`CredentialCipher`] before
//! they reach the database and are only ever opened again in [`ConnectionManagement::fetch_credential`].
use std::fmt::Debug;

use bank_providers::{Credential, ExternalAccount, PageCursor, ProviderKind, RawTransaction};
use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{accounts, attempts, connections, db_url, new_pool, orders, payments, refunds, transactions};
use crate::{
    db_types::{
        AuthorizationAttempt,
        BankAccount,
        BankConnection,
        ConnectionId,
        ConnectionQueryFilter,
        ConnectionState,
        ConnectionSyncReport,
        CurrencyCode,
        MinorUnits,
        NewAuthorizationAttempt,
        NewConnection,
        NewOrder,
        NewPayment,
        NewRefund,
        NewTransactionRecord,
        Order,
        Payment,
        Refund,
        TransactionQueryFilter,
        TransactionRecord,
        TransactionState,
        TransactionUpdate,
    },
    helpers::CredentialCipher,
    traits::{
        BankSyncDatabase,
        BankSyncDatabaseError,
        ConnectionManagement,
        InsertPaymentResult,
        InsertTransactionResult,
        OrderManagement,
        PaymentConfirmation,
        RefundRecording,
        TransactionManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
    cipher: CredentialCipher,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `BSYNC_DATABASE_URL`.
    pub async fn new(max_connections: u32, cipher: CredentialCipher) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections, cipher).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32, cipher: CredentialCipher) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool, cipher })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl BankSyncDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl ConnectionManagement for SqliteDatabase {
    async fn insert_authorization_attempt(
        &self,
        attempt: NewAuthorizationAttempt,
    ) -> Result<AuthorizationAttempt, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        attempts::insert(attempt, &mut conn).await
    }

    async fn fetch_authorization_attempt(
        &self,
        state_token: &str,
    ) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        attempts::fetch_by_state_token(state_token, &mut conn).await
    }

    async fn update_attempt_state(
        &self,
        id: i64,
        state: ConnectionState,
    ) -> Result<AuthorizationAttempt, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        attempts::update_state(id, state, &mut conn).await
    }

    async fn transition_attempt_state(
        &self,
        id: i64,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        attempts::transition_state(id, from, to, &mut conn).await
    }

    async fn expire_authorization_attempts(&self, cutoff: DateTime<Utc>) -> Result<u64, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        attempts::expire_pending(cutoff, &mut conn).await
    }

    async fn insert_connection(&self, connection: NewConnection) -> Result<BankConnection, BankSyncDatabaseError> {
        let sealed = self.cipher.encrypt(&connection.credential)?;
        let mut conn = self.pool.acquire().await?;
        connections::insert(
            &connection.organizer,
            connection.provider,
            &connection.institution_id,
            sealed,
            connection.credential.consent_expires_at,
            &mut conn,
        )
        .await
    }

    async fn fetch_connection(&self, id: ConnectionId) -> Result<Option<BankConnection>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::fetch(id, &mut conn).await
    }

    async fn fetch_active_connection(
        &self,
        organizer: &str,
        provider: ProviderKind,
        institution_id: &str,
    ) -> Result<Option<BankConnection>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::fetch_active(organizer, provider, institution_id, &mut conn).await
    }

    async fn fetch_connections(
        &self,
        filter: ConnectionQueryFilter,
    ) -> Result<Vec<BankConnection>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::search(filter, &mut conn).await
    }

    async fn fetch_credential(&self, id: ConnectionId) -> Result<Credential, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let sealed = connections::fetch_sealed_credential(id, &mut conn).await?;
        Ok(self.cipher.decrypt(&sealed)?)
    }

    async fn update_connection_state(
        &self,
        id: ConnectionId,
        state: ConnectionState,
    ) -> Result<BankConnection, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::update_state(id, state, &mut conn).await
    }

    async fn store_credential(
        &self,
        id: ConnectionId,
        credential: &Credential,
        state: ConnectionState,
    ) -> Result<BankConnection, BankSyncDatabaseError> {
        let sealed = self.cipher.encrypt(credential)?;
        let mut conn = self.pool.acquire().await?;
        connections::store_credential(id, sealed, credential.consent_expires_at, state, &mut conn).await
    }

    async fn record_failure(&self, id: ConnectionId, message: &str) -> Result<i64, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::record_failure(id, message, &mut conn).await
    }

    async fn reset_failures(&self, id: ConnectionId) -> Result<(), BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::reset_failures(id, &mut conn).await
    }

    async fn set_needs_attention(&self, id: ConnectionId, needs_attention: bool) -> Result<(), BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::set_needs_attention(id, needs_attention, &mut conn).await
    }

    async fn record_sync_outcome(
        &self,
        id: ConnectionId,
        report: &ConnectionSyncReport,
    ) -> Result<(), BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::record_sync_outcome(id, report, &mut conn).await
    }

    async fn try_consume_daily_sync(
        &self,
        id: ConnectionId,
        today: NaiveDate,
        max_per_day: i64,
    ) -> Result<bool, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::try_consume_daily_sync(id, today, max_per_day, &mut conn).await
    }

    async fn mark_expiry_warning_sent(&self, id: ConnectionId, at: DateTime<Utc>) -> Result<(), BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        connections::mark_expiry_warning_sent(id, at, &mut conn).await
    }

    async fn upsert_accounts(
        &self,
        id: ConnectionId,
        accounts: &[ExternalAccount],
    ) -> Result<Vec<BankAccount>, BankSyncDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut result = Vec::with_capacity(accounts.len());
        for account in accounts {
            result.push(accounts::upsert(id, account, &mut tx).await?);
        }
        tx.commit().await?;
        debug!("🗃️ {} account(s) stored for connection {id}", result.len());
        Ok(result)
    }

    async fn fetch_accounts(&self, id: ConnectionId) -> Result<Vec<BankAccount>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        accounts::fetch_for_connection(id, &mut conn).await
    }

    async fn fetch_cursor(&self, account_id: i64) -> Result<PageCursor, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        accounts::fetch_cursor(account_id, &mut conn).await
    }

    async fn save_cursor(&self, account_id: i64, cursor: &PageCursor) -> Result<(), BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        accounts::save_cursor(account_id, cursor, &mut conn).await
    }
}

impl TransactionManagement for SqliteDatabase {
    async fn insert_transaction(
        &self,
        transaction: NewTransactionRecord,
    ) -> Result<InsertTransactionResult, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::idempotent_insert(transaction, &mut conn).await
    }

    async fn fetch_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch(id, &mut conn).await
    }

    async fn promote_pending_transaction(
        &self,
        id: i64,
        booked: &RawTransaction,
    ) -> Result<TransactionRecord, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::promote_pending(id, booked, &mut conn).await
    }

    async fn update_transaction_state(
        &self,
        id: i64,
        state: TransactionState,
        update: TransactionUpdate,
    ) -> Result<TransactionRecord, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::update_state(id, state, update, &mut conn).await
    }

    async fn transition_transaction_state(
        &self,
        id: i64,
        from: &[TransactionState],
        state: TransactionState,
        update: TransactionUpdate,
    ) -> Result<Option<TransactionRecord>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::transition_state(id, from, state, update, &mut conn).await
    }

    async fn search_transactions(
        &self,
        filter: TransactionQueryFilter,
    ) -> Result<Vec<TransactionRecord>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::search(filter, &mut conn).await
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, BankSyncDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert(order, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch(id, &mut conn).await
    }

    async fn fetch_order_by_code(&self, organizer: &str, code: &str) -> Result<Option<Order>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_by_code(organizer, code, &mut conn).await
    }

    async fn fetch_orders_by_code(&self, organizer: &str, code: &str) -> Result<Vec<Order>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_all_by_code(organizer, code, &mut conn).await
    }

    async fn fetch_order_by_invoice(
        &self,
        organizer: &str,
        invoice_number: &str,
    ) -> Result<Option<Order>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_by_invoice(organizer, invoice_number, &mut conn).await
    }

    async fn fetch_awaiting_orders(
        &self,
        organizer: &str,
        currency: &CurrencyCode,
    ) -> Result<Vec<Order>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_awaiting(organizer, currency, &mut conn).await
    }

    async fn fetch_payments_for_transaction(
        &self,
        connection_id: ConnectionId,
        transaction_id: &str,
    ) -> Result<Vec<Payment>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_for_transaction(connection_id, transaction_id, &mut conn).await
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<InsertPaymentResult, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        payments::idempotent_insert(payment, &mut conn).await
    }

    /// Marks the payment confirmed and books it against the order in a single atomic transaction.
    async fn confirm_payment(&self, payment_id: i64) -> Result<PaymentConfirmation, BankSyncDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let (payment, newly_confirmed) = match payments::mark_confirmed(payment_id, &mut tx).await? {
            Some(payment) => {
                orders::apply_payment(payment.order_id, payment.amount, &mut tx).await?;
                debug!("🗃️ Payment #{payment_id} confirmed. {} booked against order {}", payment.amount, payment.order_code);
                (payment, true)
            },
            None => {
                let payment =
                    payments::fetch(payment_id, &mut tx).await?.ok_or(BankSyncDatabaseError::PaymentNotFound(payment_id))?;
                (payment, false)
            },
        };
        let order = orders::fetch(payment.order_id, &mut tx)
            .await?
            .ok_or_else(|| BankSyncDatabaseError::OrderNotFound(payment.order_code.clone()))?;
        tx.commit().await?;
        Ok(PaymentConfirmation { payment, order, newly_confirmed })
    }

    async fn request_refund(&self, refund: NewRefund) -> Result<Refund, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        refunds::insert_requested(refund, &mut conn).await
    }

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, BankSyncDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_for_order(order_id, &mut conn).await
    }

    async fn record_refund(
        &self,
        connection_id: ConnectionId,
        transaction_id: &str,
        order: &Order,
        amount: MinorUnits,
    ) -> Result<RefundRecording, BankSyncDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let recording = refunds::record(connection_id, transaction_id, order, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(recording)
    }
}
