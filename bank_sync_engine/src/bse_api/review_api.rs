//! Manual resolution of transactions the matcher could not settle on its own.
use std::fmt::Debug;

use bank_sync_common::MinorUnits;
use log::*;

use crate::{
    bse_api::errors::ReviewError,
    db_types::{Order, OrderStatus, TransactionQueryFilter, TransactionRecord, TransactionState, TransactionUpdate},
    events::EventProducers,
    sync::{existing_payments, settle_payment},
    traits::BankSyncDatabase,
};

pub struct ReviewApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B: Debug> Debug for ReviewApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReviewApi ({:?})", self.db)
    }
}

impl<B: Clone> Clone for ReviewApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone() }
    }
}

impl<B> ReviewApi<B>
where B: BankSyncDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    /// The organizer's ambiguous, unmatched, needs-review and error transactions, newest first.
    pub async fn review_queue(&self, organizer: &str) -> Result<Vec<TransactionRecord>, ReviewError> {
        let filter =
            TransactionQueryFilter::default().with_organizer(organizer).with_states(TransactionState::review_states());
        Ok(self.db.search_transactions(filter).await?)
    }

    pub async fn search_transactions(
        &self,
        filter: TransactionQueryFilter,
    ) -> Result<Vec<TransactionRecord>, ReviewError> {
        Ok(self.db.search_transactions(filter).await?)
    }

    pub async fn transaction(&self, id: i64) -> Result<TransactionRecord, ReviewError> {
        self.db.fetch_transaction(id).await?.ok_or(ReviewError::TransactionNotFound(id))
    }

    /// Pays the given orders from the transaction.
    ///
    /// With a single order, the transaction pays up to what the order still owes. Anything beyond that is left for
    /// the organizer to return and is noted on the transaction. With several orders, the transaction is split: each
    /// order receives its outstanding amount, and those must add up to the transaction amount exactly.
    ///
    /// Codes are resolved against the transaction's suggestions first. A code that several events use has to be
    /// qualified as `EVENT/CODE`.
    ///
    /// The transaction is claimed before any money moves: only one approval can take it out of the review queue, and
    /// a transaction that the host already holds payments for is refused.
    pub async fn approve(&self, id: i64, order_codes: &[String]) -> Result<TransactionRecord, ReviewError> {
        let transaction = self.reviewable(id).await?;
        let mut codes =
            order_codes.iter().map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()).collect::<Vec<_>>();
        codes.sort();
        codes.dedup();
        if codes.is_empty() {
            return Err(ReviewError::NoOrders);
        }
        let mut orders: Vec<Order> = Vec::with_capacity(codes.len());
        for code in &codes {
            let order = self.resolve_order(&transaction, code).await?;
            if order.status != OrderStatus::AwaitingPayment {
                return Err(ReviewError::OrderNotPayable { code: order.code, status: order.status });
            }
            if !orders.iter().any(|o| o.id == order.id) {
                orders.push(order);
            }
        }
        let allocation = allocate(&transaction, orders)?;
        let update = approval_update(&transaction, &allocation);

        let claimed = self
            .db
            .transition_transaction_state(id, &[transaction.state], TransactionState::Matched, update)
            .await?;
        let Some(claimed) = claimed else {
            let state = self.transaction(id).await?.state;
            debug!("💰️ Transaction {id} was resolved elsewhere while it was being approved. It is now {state}");
            return Err(ReviewError::NotReviewable { id, state });
        };
        let existing = existing_payments(&self.db, &transaction).await?;
        if !existing.is_empty() {
            let orders = existing.into_iter().map(|p| p.order_code).collect::<Vec<_>>().join(", ");
            warn!("💰️ Transaction {} already pays {orders}. Not approving it again.", transaction.external_id);
            self.restore(&transaction).await?;
            return Err(ReviewError::AlreadyPaid { id, orders });
        }
        for (i, (order, amount)) in allocation.iter().enumerate() {
            if let Err(e) = settle_payment(&self.db, &self.producers, &transaction, order, *amount, true).await {
                warn!("💰️ Could not pay order {} from transaction {}. {e}", order.code, transaction.external_id);
                if i == 0 {
                    self.restore(&transaction).await?;
                } else {
                    let paid = allocation[..i].iter().map(|(o, _)| o.code.as_str()).collect::<Vec<_>>().join(", ");
                    let message = format!("Approval stopped after paying {paid}. {e}");
                    let update = TransactionUpdate { message: Some(message), ..TransactionUpdate::default() };
                    self.db.update_transaction_state(id, TransactionState::Error, update).await?;
                }
                return Err(e.into());
            }
        }
        let matched = claimed.matched_orders.join(", ");
        info!("💰️ Transaction {} approved manually for {matched}", transaction.external_id);
        Ok(claimed)
    }

    /// Takes the transaction off the review queue without paying anything.
    pub async fn discard(&self, id: i64, reason: &str) -> Result<TransactionRecord, ReviewError> {
        let transaction = self.reviewable(id).await?;
        let update = TransactionUpdate {
            suggestions: transaction.suggestions,
            message: Some(reason.to_string()),
            ..Default::default()
        };
        let discarded = self
            .db
            .transition_transaction_state(id, &[transaction.state], TransactionState::Discarded, update)
            .await?;
        match discarded {
            Some(record) => {
                info!("💰️ Transaction {} discarded: {reason}", record.external_id);
                Ok(record)
            },
            None => {
                let state = self.transaction(id).await?.state;
                Err(ReviewError::NotReviewable { id, state })
            },
        }
    }

    async fn reviewable(&self, id: i64) -> Result<TransactionRecord, ReviewError> {
        let transaction = self.transaction(id).await?;
        if !transaction.state.is_reviewable() || !transaction.amount.value().is_positive() {
            return Err(ReviewError::NotReviewable { id, state: transaction.state });
        }
        Ok(transaction)
    }

    /// Finds the order an admin meant by `code`. `EVENT/CODE` picks the event explicitly.
    async fn resolve_order(&self, transaction: &TransactionRecord, code: &str) -> Result<Order, ReviewError> {
        let (event, code) = match code.split_once('/') {
            Some((event, code)) => (Some(event.trim()), code.trim()),
            None => (None, code),
        };
        if event.is_none() {
            let suggested =
                transaction.suggestions.iter().filter(|s| s.order_code.eq_ignore_ascii_case(code)).collect::<Vec<_>>();
            if let [suggestion] = suggested.as_slice() {
                if let Some(order) = self.db.fetch_order(suggestion.order_id).await? {
                    return Ok(order);
                }
            }
        }
        let mut candidates = self.db.fetch_orders_by_code(&transaction.organizer, code).await?;
        if let Some(event) = event {
            candidates.retain(|o| o.event.eq_ignore_ascii_case(event));
        }
        if candidates.len() > 1 {
            let payable =
                candidates.iter().filter(|o| o.status == OrderStatus::AwaitingPayment).cloned().collect::<Vec<_>>();
            if payable.len() == 1 {
                candidates = payable;
            }
        }
        match candidates.len() {
            0 => Err(ReviewError::OrderNotFound(code.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => {
                let events = candidates.iter().map(|o| o.event.as_str()).collect::<Vec<_>>().join(", ");
                Err(ReviewError::AmbiguousOrder { code: code.to_string(), events })
            },
        }
    }

    /// Puts a claimed transaction back the way it was before the approval started.
    async fn restore(&self, previous: &TransactionRecord) -> Result<(), ReviewError> {
        let update = TransactionUpdate {
            matched_orders: previous.matched_orders.clone(),
            suggestions: previous.suggestions.clone(),
            message: previous.message.clone(),
            payment_group_id: previous.payment_group_id.clone(),
        };
        self.db.update_transaction_state(previous.id, previous.state, update).await?;
        Ok(())
    }
}

/// What the transaction looks like once the allocation is paid.
fn approval_update(transaction: &TransactionRecord, allocation: &[(Order, MinorUnits)]) -> TransactionUpdate {
    let matched = allocation.iter().map(|(o, _)| o.code.clone()).collect::<Vec<_>>();
    let mut message = "Approved manually".to_string();
    let mut update = TransactionUpdate::matched(matched);
    if let [(order, amount)] = allocation {
        if *amount < transaction.amount {
            let surplus = transaction.amount - *amount;
            message = format!(
                "Approved manually. {} {} more than order {} owed was received",
                surplus.to_decimal_string(&transaction.currency),
                transaction.currency,
                order.code
            );
        } else if *amount < order.pending {
            update = update.partial(transaction.partial_payment_group(&order.code));
        }
    }
    update.message = Some(message);
    update
}

fn allocate(transaction: &TransactionRecord, orders: Vec<Order>) -> Result<Vec<(Order, MinorUnits)>, ReviewError> {
    if orders.len() == 1 {
        return Ok(orders
            .into_iter()
            .map(|o| {
                let amount = transaction.amount.min(o.pending);
                (o, amount)
            })
            .collect());
    }
    let owed = orders.iter().map(|o| o.pending).sum::<MinorUnits>();
    if owed != transaction.amount {
        return Err(ReviewError::SplitMismatch {
            owed: owed.to_decimal_string(&transaction.currency),
            amount: transaction.amount.to_decimal_string(&transaction.currency),
        });
    }
    Ok(orders
        .into_iter()
        .map(|o| {
            let amount = o.pending;
            (o, amount)
        })
        .collect())
}
