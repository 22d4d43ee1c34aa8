use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{AuthorizationAttempt, ConnectionId, ConnectionState, NewAuthorizationAttempt},
    sqlite::db::parse_column,
    traits::BankSyncDatabaseError,
};

#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    state_token: String,
    organizer: String,
    provider: String,
    institution_id: String,
    redirect_uri: String,
    provider_reference: Option<String>,
    connection_id: Option<ConnectionId>,
    state: ConnectionState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for AuthorizationAttempt {
    type Error = BankSyncDatabaseError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            state_token: row.state_token,
            organizer: row.organizer,
            provider: parse_column(&row.provider, "provider")?,
            institution_id: row.institution_id,
            redirect_uri: row.redirect_uri,
            provider_reference: row.provider_reference,
            connection_id: row.connection_id,
            state: row.state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert(
    attempt: NewAuthorizationAttempt,
    conn: &mut SqliteConnection,
) -> Result<AuthorizationAttempt, BankSyncDatabaseError> {
    let row: AttemptRow = sqlx::query_as(
        r#"
            INSERT INTO authorization_attempts (
                state_token,
                organizer,
                provider,
                institution_id,
                redirect_uri,
                provider_reference,
                connection_id,
                state,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *;
        "#,
    )
    .bind(attempt.state_token)
    .bind(attempt.organizer)
    .bind(attempt.provider.as_str())
    .bind(attempt.institution_id)
    .bind(attempt.redirect_uri)
    .bind(attempt.provider_reference)
    .bind(attempt.connection_id)
    .bind(ConnectionState::AuthorizationPending)
    .bind(attempt.created_at)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Authorization attempt #{} for {} stored", row.id, row.organizer);
    row.try_into()
}

pub async fn fetch_by_state_token(
    state_token: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError> {
    let row: Option<AttemptRow> = sqlx::query_as("SELECT * FROM authorization_attempts WHERE state_token = $1")
        .bind(state_token)
        .fetch_optional(conn)
        .await?;
    row.map(AuthorizationAttempt::try_from).transpose()
}

pub async fn update_state(
    id: i64,
    state: ConnectionState,
    conn: &mut SqliteConnection,
) -> Result<AuthorizationAttempt, BankSyncDatabaseError> {
    let row: Option<AttemptRow> =
        sqlx::query_as("UPDATE authorization_attempts SET state = $1, updated_at = $2 WHERE id = $3 RETURNING *")
            .bind(state)
            .bind(Utc::now())
            .bind(id)
            .fetch_all(conn)
            .await?
            .into_iter()
            .next();
    row.ok_or(BankSyncDatabaseError::AttemptNotFound)?.try_into()
}

pub async fn transition_state(
    id: i64,
    from: ConnectionState,
    to: ConnectionState,
    conn: &mut SqliteConnection,
) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError> {
    let row: Option<AttemptRow> = sqlx::query_as(
        "UPDATE authorization_attempts SET state = $1, updated_at = $2 WHERE id = $3 AND state = $4 RETURNING *",
    )
    .bind(to)
    .bind(Utc::now())
    .bind(id)
    .bind(from)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next();
    if row.is_none() {
        debug!("🗃️ Authorization attempt #{id} is no longer {from}");
    }
    row.map(AuthorizationAttempt::try_from).transpose()
}

/// Moves pending attempts created before `cutoff` back to `Unconnected`.
pub async fn expire_pending(cutoff: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, BankSyncDatabaseError> {
    let result = sqlx::query(
        "UPDATE authorization_attempts SET state = $1, updated_at = $2 WHERE state = $3 AND created_at < $4",
    )
    .bind(ConnectionState::Unconnected)
    .bind(Utc::now())
    .bind(ConnectionState::AuthorizationPending)
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
