use chrono::Utc;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{ConnectionId, MinorUnits, NewRefund, Order, Refund, RefundStatus},
    traits::{BankSyncDatabaseError, RefundRecording},
};

pub async fn insert_requested(refund: NewRefund, conn: &mut SqliteConnection) -> Result<Refund, BankSyncDatabaseError> {
    let refund: Refund = sqlx::query_as(
        r#"
        INSERT INTO refunds (order_id, order_code, amount, currency, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(refund.order_id)
    .bind(&refund.order_code)
    .bind(refund.amount)
    .bind(&refund.currency)
    .bind(RefundStatus::Requested)
    .bind(Utc::now())
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Refund #{} of {} for order {} requested", refund.id, refund.amount, refund.order_code);
    Ok(refund)
}

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, BankSyncDatabaseError> {
    let refunds = sqlx::query_as("SELECT * FROM refunds WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

pub async fn fetch_for_transaction(
    connection_id: ConnectionId,
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, BankSyncDatabaseError> {
    let refund = sqlx::query_as("SELECT * FROM refunds WHERE connection_id = $1 AND transaction_id = $2")
        .bind(connection_id)
        .bind(transaction_id)
        .fetch_optional(conn)
        .await?;
    Ok(refund)
}

/// Books an outgoing bank transaction as a refund of `order`. Run it inside a transaction.
///
/// The oldest requested refund of exactly `amount` is completed. If there is none, an external refund is recorded.
/// A transaction that was already booked as a refund hands back that refund.
pub async fn record(
    connection_id: ConnectionId,
    transaction_id: &str,
    order: &Order,
    amount: MinorUnits,
    conn: &mut SqliteConnection,
) -> Result<RefundRecording, BankSyncDatabaseError> {
    if let Some(refund) = fetch_for_transaction(connection_id, transaction_id, &mut *conn).await? {
        return Ok(RefundRecording { refund, newly_recorded: false });
    }
    let now = Utc::now();
    let completed: Option<Refund> = sqlx::query_as(
        r#"
        UPDATE refunds SET status = $1, connection_id = $2, transaction_id = $3, completed_at = $4
        WHERE id = (
            SELECT id FROM refunds WHERE order_id = $5 AND amount = $6 AND status = $7 ORDER BY id LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(RefundStatus::Done)
    .bind(connection_id)
    .bind(transaction_id)
    .bind(now)
    .bind(order.id)
    .bind(amount)
    .bind(RefundStatus::Requested)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .next();
    if let Some(refund) = completed {
        debug!("🗃️ Requested refund #{} for order {} carried out by {transaction_id}", refund.id, order.code);
        return Ok(RefundRecording { refund, newly_recorded: true });
    }
    let refund: Refund = sqlx::query_as(
        r#"
        INSERT INTO refunds (order_id, order_code, amount, currency, status, connection_id, transaction_id, created_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(order.id)
    .bind(&order.code)
    .bind(amount)
    .bind(&order.currency)
    .bind(RefundStatus::External)
    .bind(connection_id)
    .bind(transaction_id)
    .bind(now)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ External refund #{} of {} for order {} recorded", refund.id, amount, order.code);
    Ok(RefundRecording { refund, newly_recorded: true })
}
