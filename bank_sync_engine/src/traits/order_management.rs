use crate::{
    db_types::{ConnectionId, CurrencyCode, MinorUnits, NewOrder, NewPayment, NewRefund, Order, Payment, Refund},
    traits::{BankSyncDatabaseError, InsertPaymentResult, PaymentConfirmation, RefundRecording},
};

/// The host platform's order and payment store, as seen by the reconciliation engine.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Stores an order awaiting payment. Orders are unique per (organizer, event, code).
    async fn insert_order(&self, order: NewOrder) -> Result<Order, BankSyncDatabaseError>;

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, BankSyncDatabaseError>;

    /// Looks the order up by code, in any status. Codes are compared case-insensitively.
    async fn fetch_order_by_code(&self, organizer: &str, code: &str) -> Result<Option<Order>, BankSyncDatabaseError>;

    /// Every order with this code, in any status and across all of the organizer's events.
    async fn fetch_orders_by_code(&self, organizer: &str, code: &str) -> Result<Vec<Order>, BankSyncDatabaseError>;

    /// Looks the order up by one of its invoice numbers, in any status.
    async fn fetch_order_by_invoice(
        &self,
        organizer: &str,
        invoice_number: &str,
    ) -> Result<Option<Order>, BankSyncDatabaseError>;

    /// All of the organizer's orders in `AwaitingPayment` status in the given currency.
    async fn fetch_awaiting_orders(
        &self,
        organizer: &str,
        currency: &CurrencyCode,
    ) -> Result<Vec<Order>, BankSyncDatabaseError>;

    /// Payments that were created for the given bank transaction.
    async fn fetch_payments_for_transaction(
        &self,
        connection_id: ConnectionId,
        transaction_id: &str,
    ) -> Result<Vec<Payment>, BankSyncDatabaseError>;

    /// Creates a payment in `Created` status. Idempotent on (connection, transaction id, order): a second call hands
    /// back the existing payment.
    async fn create_payment(&self, payment: NewPayment) -> Result<InsertPaymentResult, BankSyncDatabaseError>;

    /// Confirms the payment and books it against the order. The order's outstanding amount is reduced, and the order
    /// is marked `Paid` once nothing is outstanding. Confirming an already confirmed payment changes nothing, and
    /// the result says so.
    async fn confirm_payment(&self, payment_id: i64) -> Result<PaymentConfirmation, BankSyncDatabaseError>;

    /// Records that the host wants `amount` refunded to the customer by bank transfer.
    async fn request_refund(&self, refund: NewRefund) -> Result<Refund, BankSyncDatabaseError>;

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, BankSyncDatabaseError>;

    /// Books an outgoing bank transaction of `amount` (positive) as a refund of `order`. A matching requested refund
    /// is completed; otherwise an external refund is recorded. Idempotent on (connection, transaction id).
    async fn record_refund(
        &self,
        connection_id: ConnectionId,
        transaction_id: &str,
        order: &Order,
        amount: MinorUnits,
    ) -> Result<RefundRecording, BankSyncDatabaseError>;
}
