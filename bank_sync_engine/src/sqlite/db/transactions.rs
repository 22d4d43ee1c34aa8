use bank_providers::{BookingStatus, RawTransaction};
use bank_sync_common::{CurrencyCode, MinorUnits};
use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::{FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{
        ConnectionId,
        NewTransactionRecord,
        TransactionQueryFilter,
        TransactionRecord,
        TransactionState,
        TransactionUpdate,
    },
    traits::{BankSyncDatabaseError, InsertTransactionResult},
};

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    connection_id: ConnectionId,
    account_id: i64,
    organizer: String,
    external_id: String,
    amount: MinorUnits,
    currency: CurrencyCode,
    value_date: Option<NaiveDate>,
    booking_date: Option<NaiveDate>,
    payer_name: Option<String>,
    payer_iban: Option<String>,
    remittance: String,
    booking_status: String,
    state: TransactionState,
    matched_orders: String,
    suggestions: String,
    message: Option<String>,
    payment_group_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn booking_status_str(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Booked => "Booked",
        BookingStatus::Pending => "Pending",
    }
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = BankSyncDatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let booking_status = match row.booking_status.as_str() {
            "Booked" => BookingStatus::Booked,
            "Pending" => BookingStatus::Pending,
            s => return Err(BankSyncDatabaseError::Serialization(format!("Invalid booking status '{s}'"))),
        };
        Ok(Self {
            id: row.id,
            connection_id: row.connection_id,
            account_id: row.account_id,
            organizer: row.organizer,
            external_id: row.external_id,
            amount: row.amount,
            currency: row.currency,
            value_date: row.value_date,
            booking_date: row.booking_date,
            payer_name: row.payer_name,
            payer_iban: row.payer_iban,
            remittance: row.remittance,
            booking_status,
            state: row.state,
            matched_orders: serde_json::from_str(&row.matched_orders)?,
            suggestions: serde_json::from_str(&row.suggestions)?,
            message: row.message,
            payment_group_id: row.payment_group_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stores the transaction, or returns the record already stored under the same (connection, external id).
pub async fn idempotent_insert(
    record: NewTransactionRecord,
    conn: &mut SqliteConnection,
) -> Result<InsertTransactionResult, BankSyncDatabaseError> {
    let now = Utc::now();
    let tx = &record.transaction;
    let inserted: Option<TransactionRow> = sqlx::query_as(
        r#"
        INSERT INTO bank_transactions (
            connection_id,
            account_id,
            organizer,
            external_id,
            amount,
            currency,
            value_date,
            booking_date,
            payer_name,
            payer_iban,
            remittance,
            booking_status,
            state,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
        ON CONFLICT (connection_id, external_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(record.connection_id)
    .bind(record.account_id)
    .bind(&record.organizer)
    .bind(&tx.external_id)
    .bind(tx.amount)
    .bind(&tx.currency)
    .bind(tx.value_date)
    .bind(tx.booking_date)
    .bind(&tx.payer_name)
    .bind(&tx.payer_iban)
    .bind(&tx.remittance)
    .bind(booking_status_str(tx.booking_status))
    .bind(record.state)
    .bind(now)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .next();
    match inserted {
        Some(row) => {
            trace!("🗃️ Transaction {} stored with id {}", row.external_id, row.id);
            Ok(InsertTransactionResult::Inserted(row.try_into()?))
        },
        None => {
            let existing: TransactionRow =
                sqlx::query_as("SELECT * FROM bank_transactions WHERE connection_id = $1 AND external_id = $2")
                    .bind(record.connection_id)
                    .bind(&tx.external_id)
                    .fetch_one(conn)
                    .await?;
            trace!("🗃️ Transaction {} already stored as #{}", existing.external_id, existing.id);
            Ok(InsertTransactionResult::AlreadyExists(existing.try_into()?))
        },
    }
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<TransactionRecord>, BankSyncDatabaseError> {
    let row: Option<TransactionRow> =
        sqlx::query_as("SELECT * FROM bank_transactions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(TransactionRecord::try_from).transpose()
}

pub async fn promote_pending(
    id: i64,
    booked: &RawTransaction,
    conn: &mut SqliteConnection,
) -> Result<TransactionRecord, BankSyncDatabaseError> {
    let row: Option<TransactionRow> = sqlx::query_as(
        r#"
        UPDATE bank_transactions SET
            amount = $1,
            currency = $2,
            value_date = $3,
            booking_date = $4,
            payer_name = $5,
            payer_iban = $6,
            remittance = $7,
            booking_status = $8,
            state = $9,
            updated_at = $10
        WHERE id = $11 AND state = $12
        RETURNING *
        "#,
    )
    .bind(booked.amount)
    .bind(&booked.currency)
    .bind(booked.value_date)
    .bind(booked.booking_date)
    .bind(&booked.payer_name)
    .bind(&booked.payer_iban)
    .bind(&booked.remittance)
    .bind(booking_status_str(BookingStatus::Booked))
    .bind(TransactionState::Unchecked)
    .bind(Utc::now())
    .bind(id)
    .bind(TransactionState::Pending)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next();
    row.ok_or(BankSyncDatabaseError::TransactionNotFound(id))?.try_into()
}

pub async fn update_state(
    id: i64,
    state: TransactionState,
    update: TransactionUpdate,
    conn: &mut SqliteConnection,
) -> Result<TransactionRecord, BankSyncDatabaseError> {
    let row = write_state(id, state, update, &[], conn).await?;
    let record: TransactionRecord = row.ok_or(BankSyncDatabaseError::TransactionNotFound(id))?.try_into()?;
    debug!("🗃️ Transaction #{id} ({}) is now {state}", record.external_id);
    Ok(record)
}

/// Like [`update_state`], but only if the transaction is currently in one of `from`. Returns `None` otherwise.
pub async fn transition_state(
    id: i64,
    from: &[TransactionState],
    state: TransactionState,
    update: TransactionUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<TransactionRecord>, BankSyncDatabaseError> {
    let Some(row) = write_state(id, state, update, from, conn).await? else {
        debug!("🗃️ Transaction #{id} was not in any of {from:?}. Left as it is.");
        return Ok(None);
    };
    let record = TransactionRecord::try_from(row)?;
    debug!("🗃️ Transaction #{id} ({}) is now {state}", record.external_id);
    Ok(Some(record))
}

async fn write_state(
    id: i64,
    state: TransactionState,
    update: TransactionUpdate,
    from: &[TransactionState],
    conn: &mut SqliteConnection,
) -> Result<Option<TransactionRow>, BankSyncDatabaseError> {
    let matched = serde_json::to_string(&update.matched_orders)?;
    let suggestions = serde_json::to_string(&update.suggestions)?;
    let mut builder = QueryBuilder::new("UPDATE bank_transactions SET state = ");
    builder.push_bind(state);
    builder.push(", matched_orders = ");
    builder.push_bind(matched);
    builder.push(", suggestions = ");
    builder.push_bind(suggestions);
    builder.push(", message = ");
    builder.push_bind(update.message);
    builder.push(", payment_group_id = ");
    builder.push_bind(update.payment_group_id);
    builder.push(", updated_at = ");
    builder.push_bind(Utc::now());
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    if !from.is_empty() {
        builder.push(" AND state IN (");
        let mut states = builder.separated(", ");
        for s in from {
            states.push_bind(*s);
        }
        states.push_unseparated(")");
    }
    builder.push(" RETURNING *");
    let row = builder.build_query_as::<TransactionRow>().fetch_all(conn).await?.into_iter().next();
    Ok(row)
}

/// Fetches transactions according to the filter, newest first.
pub async fn search(
    filter: TransactionQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransactionRecord>, BankSyncDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT * FROM bank_transactions WHERE 1 = 1 ");
    if let Some(organizer) = filter.organizer {
        builder.push("AND organizer = ");
        builder.push_bind(organizer);
    }
    if let Some(id) = filter.connection_id {
        builder.push(" AND connection_id = ");
        builder.push_bind(id);
    }
    if !filter.states.is_empty() {
        builder.push(" AND state IN (");
        let mut states = builder.separated(", ");
        for state in filter.states {
            states.push_bind(state);
        }
        states.push_unseparated(")");
    }
    builder.push(" ORDER BY COALESCE(booking_date, value_date) DESC, id DESC");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<TransactionRow>().fetch_all(conn).await?;
    rows.into_iter().map(TransactionRecord::try_from).collect()
}
