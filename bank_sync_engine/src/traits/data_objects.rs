use crate::db_types::{Order, Payment, Refund, TransactionRecord};

/// The result of storing a fetched bank transaction. Transactions are unique per connection and external id, so a
/// re-fetched transaction hands back the record that is already stored.
#[derive(Debug, Clone)]
pub enum InsertTransactionResult {
    Inserted(TransactionRecord),
    AlreadyExists(TransactionRecord),
}

impl InsertTransactionResult {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn into_record(self) -> TransactionRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[derive(Debug, Clone)]
pub enum InsertPaymentResult {
    Inserted(Payment),
    AlreadyExists(Payment),
}

impl InsertPaymentResult {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Inserted(p) | Self::AlreadyExists(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Self::Inserted(p) | Self::AlreadyExists(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment: Payment,
    /// The order after the payment was booked against it
    pub order: Order,
    /// False if the payment had already been confirmed before this call
    pub newly_confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct RefundRecording {
    pub refund: Refund,
    /// False if the bank transaction had already been booked as this refund
    pub newly_recorded: bool,
}
