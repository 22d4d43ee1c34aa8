use bank_sync_common::MinorUnits;
use log::*;
use thiserror::Error;

use crate::{
    db_types::{NewPayment, Order, Payment, TransactionRecord},
    events::{EventProducers, PaymentConfirmedEvent},
    traits::{BankSyncDatabase, BankSyncDatabaseError, PaymentConfirmation},
};

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("{0}")]
    Database(#[from] BankSyncDatabaseError),
    #[error("Order {code} is in {currency}, but the transaction is in {tx_currency}")]
    CurrencyMismatch { code: String, currency: String, tx_currency: String },
    #[error("Order {code} only has {outstanding} outstanding, so a payment of {amount} cannot be booked against it")]
    ExceedsOutstanding { code: String, outstanding: String, amount: String },
}

/// Creates and confirms the payment of `amount` from `transaction` to `order`.
///
/// The host is asked for existing payments on the transaction first. If there is one for this order it is confirmed
/// (a no-op if that already happened) instead of creating another. The `PaymentConfirmed` event is only published
/// the first time a payment is confirmed.
///
/// A new payment is never larger than what the order still owes.
pub async fn settle_payment<B: BankSyncDatabase>(
    db: &B,
    producers: &EventProducers,
    transaction: &TransactionRecord,
    order: &Order,
    amount: MinorUnits,
    manual: bool,
) -> Result<PaymentConfirmation, SettlementError> {
    if order.currency != transaction.currency {
        return Err(SettlementError::CurrencyMismatch {
            code: order.code.clone(),
            currency: order.currency.to_string(),
            tx_currency: transaction.currency.to_string(),
        });
    }
    let existing = db.fetch_payments_for_transaction(transaction.connection_id, &transaction.external_id).await?;
    let payment = match existing.into_iter().find(|p| p.order_id == order.id) {
        Some(p) => {
            debug!("💰️ Transaction {} already has payment #{} for order {}", transaction.external_id, p.id, order.code);
            p
        },
        None => {
            if amount > order.pending {
                return Err(SettlementError::ExceedsOutstanding {
                    code: order.code.clone(),
                    outstanding: order.pending.to_decimal_string(&order.currency),
                    amount: amount.to_decimal_string(&transaction.currency),
                });
            }
            let new_payment = NewPayment {
                connection_id: transaction.connection_id,
                transaction_id: transaction.external_id.clone(),
                order_id: order.id,
                order_code: order.code.clone(),
                amount,
                currency: transaction.currency.clone(),
            };
            db.create_payment(new_payment).await?.into_payment()
        },
    };
    let confirmation = db.confirm_payment(payment.id).await?;
    if confirmation.newly_confirmed {
        info!(
            "💰️ Payment of {} {} from transaction {} confirmed for order {}",
            amount.to_decimal_string(&transaction.currency),
            transaction.currency,
            transaction.external_id,
            order.code
        );
        let event = PaymentConfirmedEvent {
            payment: confirmation.payment.clone(),
            order: confirmation.order.clone(),
            transaction: transaction.clone(),
            manual,
        };
        producers.payment_confirmed(event).await;
    }
    Ok(confirmation)
}

/// The payments the host already holds for the transaction, if any.
pub(crate) async fn existing_payments<B: BankSyncDatabase>(
    db: &B,
    transaction: &TransactionRecord,
) -> Result<Vec<Payment>, BankSyncDatabaseError> {
    db.fetch_payments_for_transaction(transaction.connection_id, &transaction.external_id).await
}
