//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers can obtain a connection from a pool, or open a transaction when several writes have to land
//! together, and call through to the functions without any other changes.
//!
//! Timestamps are always bound from Rust, so the database clock never matters.
//!
//! Writes with a `RETURNING` clause are always driven with `fetch_all`. SQLite only finishes (and, outside a
//! transaction, commits) a statement once it has been stepped to the end, and `fetch_one`/`fetch_optional` stop
//! after the first row, leaving the write invisible to the other connections in the pool.
use std::env;

use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

use crate::traits::BankSyncDatabaseError;

pub mod accounts;
pub mod attempts;
pub mod connections;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod transactions;

const SQLITE_DB_URL: &str = "sqlite://data/bank_sync.db";

pub fn db_url() -> String {
    let result = env::var("BSYNC_DATABASE_URL").unwrap_or_else(|_| {
        info!("BSYNC_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}

pub(crate) fn is_unique_violation(e: &SqlxError) -> bool {
    matches!(e, SqlxError::Database(db) if db.is_unique_violation())
}

pub(crate) fn parse_column<T: std::str::FromStr>(value: &str, column: &str) -> Result<T, BankSyncDatabaseError>
where T::Err: std::fmt::Display {
    value.parse::<T>().map_err(|e| BankSyncDatabaseError::Serialization(format!("Invalid {column} '{value}': {e}")))
}
