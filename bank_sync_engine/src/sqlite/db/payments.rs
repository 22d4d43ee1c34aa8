use chrono::Utc;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{ConnectionId, NewPayment, Payment, PaymentStatus},
    traits::{BankSyncDatabaseError, InsertPaymentResult},
};

/// Creates the payment unless one already exists for the same (connection, transaction, order).
pub async fn idempotent_insert(
    payment: NewPayment,
    conn: &mut SqliteConnection,
) -> Result<InsertPaymentResult, BankSyncDatabaseError> {
    let inserted: Option<Payment> = sqlx::query_as(
        r#"
        INSERT INTO payments (connection_id, transaction_id, order_id, order_code, amount, currency, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (connection_id, transaction_id, order_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(payment.connection_id)
    .bind(&payment.transaction_id)
    .bind(payment.order_id)
    .bind(&payment.order_code)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(PaymentStatus::Created)
    .bind(Utc::now())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .next();
    match inserted {
        Some(p) => {
            debug!("🗃️ Payment #{} of {} for order {} created", p.id, p.amount, p.order_code);
            Ok(InsertPaymentResult::Inserted(p))
        },
        None => {
            let existing: Payment = sqlx::query_as(
                "SELECT * FROM payments WHERE connection_id = $1 AND transaction_id = $2 AND order_id = $3",
            )
            .bind(payment.connection_id)
            .bind(&payment.transaction_id)
            .bind(payment.order_id)
            .fetch_one(conn)
            .await?;
            debug!("🗃️ Payment for transaction {} and order {} already exists", payment.transaction_id, payment.order_code);
            Ok(InsertPaymentResult::AlreadyExists(existing))
        },
    }
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, BankSyncDatabaseError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_for_transaction(
    connection_id: ConnectionId,
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, BankSyncDatabaseError> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE connection_id = $1 AND transaction_id = $2 ORDER BY id")
        .bind(connection_id)
        .bind(transaction_id)
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

/// Marks the payment confirmed. Returns `None` if it was already confirmed.
pub async fn mark_confirmed(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, BankSyncDatabaseError> {
    let payment = sqlx::query_as(
        "UPDATE payments SET status = $1, confirmed_at = $2 WHERE id = $3 AND status != $1 RETURNING *",
    )
    .bind(PaymentStatus::Confirmed)
    .bind(Utc::now())
    .bind(id)
    .fetch_all(conn)
    .await?
    .into_iter()
    .next();
    Ok(payment)
}
