use bank_sync_common::{CurrencyCode, MinorUnits};
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderStatus},
    helpers::normalize_reference,
    traits::BankSyncDatabaseError,
};

const INVOICE_SEPARATOR: char = '\u{1e}';

/// Every order query selects the order's invoice numbers as one separated column.
const ORDER_SELECT: &str = r#"
    SELECT orders.*, (SELECT GROUP_CONCAT(number, char(30)) FROM invoices WHERE invoices.order_id = orders.id) AS invoice_list
    FROM orders
"#;

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    organizer: String,
    event: String,
    code: String,
    currency: CurrencyCode,
    total: MinorUnits,
    pending: MinorUnits,
    status: OrderStatus,
    customer_name: Option<String>,
    invoice_list: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        let invoice_numbers = row
            .invoice_list
            .map(|list| list.split(INVOICE_SEPARATOR).map(String::from).collect())
            .unwrap_or_default();
        Self {
            id: row.id,
            organizer: row.organizer,
            event: row.event,
            code: row.code,
            currency: row.currency,
            total: row.total,
            pending: row.pending,
            status: row.status,
            customer_name: row.customer_name,
            invoice_numbers,
            created_at: row.created_at,
        }
    }
}

/// Inserts the order and its invoice numbers. Not atomic on its own; run it inside a transaction.
pub async fn insert(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, BankSyncDatabaseError> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO orders (organizer, event, code, currency, total, pending, status, customer_name, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $8)
        RETURNING id
        "#,
    )
    .bind(&order.organizer)
    .bind(&order.event)
    .bind(&order.code)
    .bind(&order.currency)
    .bind(order.total)
    .bind(OrderStatus::AwaitingPayment)
    .bind(&order.customer_name)
    .bind(now)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .next()
    .ok_or(sqlx::Error::RowNotFound)?;
    for number in &order.invoice_numbers {
        sqlx::query("INSERT INTO invoices (order_id, number) VALUES ($1, $2)")
            .bind(id)
            .bind(number)
            .execute(&mut *conn)
            .await?;
    }
    debug!("🗃️ Order {} for {} stored with id {id}", order.code, order.organizer);
    fetch(id, conn).await?.ok_or_else(|| BankSyncDatabaseError::OrderNotFound(order.code.clone()))
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, BankSyncDatabaseError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("{ORDER_SELECT} WHERE orders.id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Order::from))
}

/// Codes are compared case-insensitively. The most recent order wins if several events share a code.
pub async fn fetch_by_code(
    organizer: &str,
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, BankSyncDatabaseError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "{ORDER_SELECT} WHERE orders.organizer = $1 AND UPPER(orders.code) = UPPER($2) ORDER BY orders.id DESC LIMIT 1"
    ))
    .bind(organizer)
    .bind(code)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Order::from))
}

/// Every order of the organizer with this code, across all events, oldest first.
pub async fn fetch_all_by_code(
    organizer: &str,
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, BankSyncDatabaseError> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "{ORDER_SELECT} WHERE orders.organizer = $1 AND UPPER(orders.code) = UPPER($2) ORDER BY orders.id"
    ))
    .bind(organizer)
    .bind(code)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Order::from).collect())
}

/// Invoice numbers are compared with separators and case ignored.
pub async fn fetch_by_invoice(
    organizer: &str,
    invoice_number: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, BankSyncDatabaseError> {
    let wanted = normalize_reference(invoice_number);
    let candidates: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT invoices.order_id, invoices.number FROM invoices
        JOIN orders ON orders.id = invoices.order_id
        WHERE orders.organizer = $1
        ORDER BY invoices.order_id DESC
        "#,
    )
    .bind(organizer)
    .fetch_all(&mut *conn)
    .await?;
    let found = candidates.into_iter().find(|(_, number)| normalize_reference(number) == wanted);
    match found {
        Some((id, _)) => fetch(id, conn).await,
        None => Ok(None),
    }
}

pub async fn fetch_awaiting(
    organizer: &str,
    currency: &CurrencyCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, BankSyncDatabaseError> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
        "{ORDER_SELECT} WHERE orders.organizer = $1 AND orders.currency = $2 AND orders.status = $3 ORDER BY orders.id"
    ))
    .bind(organizer)
    .bind(currency)
    .bind(OrderStatus::AwaitingPayment)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Order::from).collect())
}

/// Books `amount` against the order. The order is `Paid` once nothing is outstanding.
pub async fn apply_payment(
    order_id: i64,
    amount: MinorUnits,
    conn: &mut SqliteConnection,
) -> Result<(), BankSyncDatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            pending = pending - $1,
            status = CASE WHEN pending - $1 <= 0 THEN $2 ELSE status END,
            updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(amount)
    .bind(OrderStatus::Paid)
    .bind(Utc::now())
    .bind(order_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(BankSyncDatabaseError::OrderNotFound(format!("#{order_id}")));
    }
    Ok(())
}
