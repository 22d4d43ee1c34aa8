use bank_providers::ProviderKind;
use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::{FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{BankConnection, ConnectionId, ConnectionQueryFilter, ConnectionState, ConnectionSyncReport},
    sqlite::db::{is_unique_violation, parse_column},
    traits::BankSyncDatabaseError,
};

#[derive(FromRow)]
struct ConnectionRow {
    id: ConnectionId,
    organizer: String,
    provider: String,
    institution_id: String,
    state: ConnectionState,
    consent_expires_at: DateTime<Utc>,
    consecutive_failures: i64,
    needs_attention: bool,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
    last_sync_report: Option<String>,
    sync_day: Option<NaiveDate>,
    syncs_today: i64,
    expiry_warning_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for BankConnection {
    type Error = BankSyncDatabaseError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        let last_sync_report =
            row.last_sync_report.as_deref().map(serde_json::from_str::<ConnectionSyncReport>).transpose()?;
        Ok(Self {
            id: row.id,
            organizer: row.organizer,
            provider: parse_column(&row.provider, "provider")?,
            institution_id: row.institution_id,
            state: row.state,
            consent_expires_at: row.consent_expires_at,
            consecutive_failures: row.consecutive_failures,
            needs_attention: row.needs_attention,
            last_error: row.last_error,
            last_error_at: row.last_error_at,
            last_sync_at: row.last_sync_at,
            last_sync_report,
            sync_day: row.sync_day,
            syncs_today: row.syncs_today,
            expiry_warning_sent_at: row.expiry_warning_sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_connection(row: Option<ConnectionRow>, id: ConnectionId) -> Result<BankConnection, BankSyncDatabaseError> {
    row.ok_or(BankSyncDatabaseError::ConnectionNotFound(id))?.try_into()
}

/// Inserts a `Connected` connection with an already sealed credential.
pub async fn insert(
    organizer: &str,
    provider: ProviderKind,
    institution_id: &str,
    sealed_credential: Vec<u8>,
    consent_expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<BankConnection, BankSyncDatabaseError> {
    let now = Utc::now();
    let result = sqlx::query_as::<_, ConnectionRow>(
        r#"
            INSERT INTO bank_connections (
                organizer,
                provider,
                institution_id,
                state,
                credential,
                consent_expires_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *;
        "#,
    )
    .bind(organizer)
    .bind(provider.as_str())
    .bind(institution_id)
    .bind(ConnectionState::Connected)
    .bind(sealed_credential)
    .bind(consent_expires_at)
    .bind(now)
    .fetch_all(conn)
    .await
    .and_then(|rows| rows.into_iter().next().ok_or(sqlx::Error::RowNotFound));
    match result {
        Ok(row) => {
            debug!("🗃️ Connection #{} for {organizer} at {institution_id} ({provider}) created", row.id.value());
            row.try_into()
        },
        Err(e) if is_unique_violation(&e) => Err(BankSyncDatabaseError::ConnectionAlreadyExists {
            organizer: organizer.to_string(),
            institution_id: institution_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch(id: ConnectionId, conn: &mut SqliteConnection) -> Result<Option<BankConnection>, BankSyncDatabaseError> {
    let row: Option<ConnectionRow> =
        sqlx::query_as("SELECT * FROM bank_connections WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(BankConnection::try_from).transpose()
}

pub async fn fetch_active(
    organizer: &str,
    provider: ProviderKind,
    institution_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<BankConnection>, BankSyncDatabaseError> {
    let row: Option<ConnectionRow> = sqlx::query_as(
        r#"
        SELECT * FROM bank_connections
        WHERE organizer = $1 AND provider = $2 AND institution_id = $3 AND state != $4
        "#,
    )
    .bind(organizer)
    .bind(provider.as_str())
    .bind(institution_id)
    .bind(ConnectionState::Revoked)
    .fetch_optional(conn)
    .await?;
    row.map(BankConnection::try_from).transpose()
}

pub async fn search(
    filter: ConnectionQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<BankConnection>, BankSyncDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT * FROM bank_connections WHERE 1 = 1 ");
    if let Some(organizer) = filter.organizer {
        builder.push("AND organizer = ");
        builder.push_bind(organizer);
    }
    if !filter.include_revoked {
        builder.push(" AND state != ");
        builder.push_bind(ConnectionState::Revoked);
    }
    builder.push(" ORDER BY id");
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<ConnectionRow>().fetch_all(conn).await?;
    rows.into_iter().map(BankConnection::try_from).collect()
}

pub async fn fetch_sealed_credential(
    id: ConnectionId,
    conn: &mut SqliteConnection,
) -> Result<Vec<u8>, BankSyncDatabaseError> {
    let sealed: Option<Vec<u8>> = sqlx::query_scalar("SELECT credential FROM bank_connections WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    sealed.ok_or(BankSyncDatabaseError::ConnectionNotFound(id))
}

pub async fn update_state(
    id: ConnectionId,
    state: ConnectionState,
    conn: &mut SqliteConnection,
) -> Result<BankConnection, BankSyncDatabaseError> {
    let row = sqlx::query_as("UPDATE bank_connections SET state = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(state)
        .bind(Utc::now())
        .bind(id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .next();
    into_connection(row, id)
}

pub async fn store_credential(
    id: ConnectionId,
    sealed_credential: Vec<u8>,
    consent_expires_at: DateTime<Utc>,
    state: ConnectionState,
    conn: &mut SqliteConnection,
) -> Result<BankConnection, BankSyncDatabaseError> {
    let row = sqlx::query_as(
        r#"
        UPDATE bank_connections SET
            credential = $1,
            expiry_warning_sent_at = CASE WHEN consent_expires_at = $2 THEN expiry_warning_sent_at ELSE NULL END,
            consent_expires_at = $2,
            state = $3,
            updated_at = $4
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(sealed_credential)
    .bind(consent_expires_at)
    .bind(state)
    .bind(Utc::now())
    .bind(id)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next();
    into_connection(row, id)
}

/// Returns the new number of consecutive failures.
pub async fn record_failure(
    id: ConnectionId,
    message: &str,
    conn: &mut SqliteConnection,
) -> Result<i64, BankSyncDatabaseError> {
    let now = Utc::now();
    let failures: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE bank_connections SET
            consecutive_failures = consecutive_failures + 1,
            last_error = $1,
            last_error_at = $2,
            updated_at = $2
        WHERE id = $3
        RETURNING consecutive_failures
        "#,
    )
    .bind(message)
    .bind(now)
    .bind(id)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next();
    failures.ok_or(BankSyncDatabaseError::ConnectionNotFound(id))
}

pub async fn reset_failures(id: ConnectionId, conn: &mut SqliteConnection) -> Result<(), BankSyncDatabaseError> {
    sqlx::query(
        "UPDATE bank_connections SET consecutive_failures = 0, needs_attention = FALSE, updated_at = $1 WHERE id = $2",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_needs_attention(
    id: ConnectionId,
    needs_attention: bool,
    conn: &mut SqliteConnection,
) -> Result<(), BankSyncDatabaseError> {
    sqlx::query("UPDATE bank_connections SET needs_attention = $1, updated_at = $2 WHERE id = $3")
        .bind(needs_attention)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn record_sync_outcome(
    id: ConnectionId,
    report: &ConnectionSyncReport,
    conn: &mut SqliteConnection,
) -> Result<(), BankSyncDatabaseError> {
    let json = serde_json::to_string(report)?;
    sqlx::query("UPDATE bank_connections SET last_sync_at = $1, last_sync_report = $2, updated_at = $3 WHERE id = $4")
        .bind(report.finished_at)
        .bind(json)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// A single conditional update, so two racing callers cannot both take the last sync of the day.
pub async fn try_consume_daily_sync(
    id: ConnectionId,
    today: NaiveDate,
    max_per_day: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, BankSyncDatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE bank_connections SET
            syncs_today = CASE WHEN sync_day = $1 THEN syncs_today + 1 ELSE 1 END,
            sync_day = $1
        WHERE id = $2 AND (sync_day IS NULL OR sync_day != $1 OR syncs_today < $3)
        "#,
    )
    .bind(today)
    .bind(id)
    .bind(max_per_day)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_expiry_warning_sent(
    id: ConnectionId,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), BankSyncDatabaseError> {
    sqlx::query("UPDATE bank_connections SET expiry_warning_sent_at = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}
