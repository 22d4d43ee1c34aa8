use bank_providers::{ExternalAccount, PageCursor};
use chrono::Utc;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{BankAccount, ConnectionId},
    traits::BankSyncDatabaseError,
};

/// Inserts or refreshes one account. Account details can change at the provider (display names mostly), the
/// external id never does.
pub async fn upsert(
    connection_id: ConnectionId,
    account: &ExternalAccount,
    conn: &mut SqliteConnection,
) -> Result<BankAccount, BankSyncDatabaseError> {
    let now = Utc::now();
    let account = sqlx::query_as(
        r#"
        INSERT INTO bank_accounts (
            connection_id,
            external_id,
            iban,
            currency,
            display_name,
            owner_name,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        ON CONFLICT (connection_id, external_id) DO UPDATE SET
            iban = excluded.iban,
            currency = excluded.currency,
            display_name = excluded.display_name,
            owner_name = excluded.owner_name,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(connection_id)
    .bind(&account.external_id)
    .bind(&account.iban)
    .bind(&account.currency)
    .bind(&account.display_name)
    .bind(&account.owner_name)
    .bind(now)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    Ok(account)
}

pub async fn fetch_for_connection(
    connection_id: ConnectionId,
    conn: &mut SqliteConnection,
) -> Result<Vec<BankAccount>, BankSyncDatabaseError> {
    let accounts = sqlx::query_as("SELECT * FROM bank_accounts WHERE connection_id = $1 ORDER BY id")
        .bind(connection_id)
        .fetch_all(conn)
        .await?;
    Ok(accounts)
}

pub async fn fetch_cursor(account_id: i64, conn: &mut SqliteConnection) -> Result<PageCursor, BankSyncDatabaseError> {
    let cursor: Option<String> = sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE account_id = $1")
        .bind(account_id)
        .fetch_optional(conn)
        .await?;
    match cursor {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(PageCursor::Start),
    }
}

pub async fn save_cursor(
    account_id: i64,
    cursor: &PageCursor,
    conn: &mut SqliteConnection,
) -> Result<(), BankSyncDatabaseError> {
    let json = serde_json::to_string(cursor)?;
    sqlx::query(
        r#"
        INSERT INTO sync_cursors (account_id, cursor, updated_at) VALUES ($1, $2, $3)
        ON CONFLICT (account_id) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(account_id)
    .bind(&json)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    trace!("🗃️ Cursor for account #{account_id} saved: {json}");
    Ok(())
}
