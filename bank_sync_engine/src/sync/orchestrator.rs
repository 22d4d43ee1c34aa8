use std::time::Duration;

use bank_providers::{
    BankProvider,
    Credential,
    ExternalAccount,
    PageCursor,
    ProviderError,
    RawTransaction,
    TransactionPage,
};
use chrono::Utc;
use futures_util::{stream, StreamExt};
use log::*;

use crate::{
    db_types::{
        BankAccount,
        BankConnection,
        ConnectionId,
        ConnectionQueryFilter,
        ConnectionState,
        ConnectionSyncReport,
        NewTransactionRecord,
        Order,
        OrderStatus,
        SyncRunReport,
        SyncStatus,
        TransactionRecord,
        TransactionState,
        TransactionUpdate,
    },
    lifecycle::{ConnectionClaim, LifecycleError, LifecycleEvent, LifecycleManager},
    matcher::{MatchInput, MatchResolution, TransactionMatcher},
    sync::settlement::{existing_payments, settle_payment, SettlementError},
    traits::{BankSyncDatabase, BankSyncDatabaseError, InsertTransactionResult},
};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hard limit on the wall-clock time of a single connection sync
    pub budget: Duration,
    /// How many connections are synced in parallel by [`SyncOrchestrator::run_all`]
    pub concurrency: usize,
    /// Banks limit unattended access to a few requests per day per account
    pub max_syncs_per_day: i64,
    /// Upper bound on pages fetched per account per sync
    pub max_pages_per_account: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(15 * 60),
            concurrency: 4,
            max_syncs_per_day: 4,
            max_pages_per_account: 100,
        }
    }
}

/// Why syncing one account stopped early.
enum AccountFailure {
    /// The connection can no longer be used. Stops the whole sync.
    Unusable(LifecycleError),
    /// Only this account is affected.
    Failed(String),
}

impl From<BankSyncDatabaseError> for AccountFailure {
    fn from(e: BankSyncDatabaseError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// The connection as it is being synced. The credential changes if it is refreshed halfway through.
struct SyncSession {
    connection: BankConnection,
    credential: Credential,
}

pub struct SyncOrchestrator<B, P> {
    lifecycle: LifecycleManager<B, P>,
    matcher: TransactionMatcher,
    config: SyncConfig,
}

impl<B: Clone, P: Clone> Clone for SyncOrchestrator<B, P> {
    fn clone(&self) -> Self {
        Self { lifecycle: self.lifecycle.clone(), matcher: self.matcher.clone(), config: self.config.clone() }
    }
}

impl<B, P> SyncOrchestrator<B, P>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    pub fn new(lifecycle: LifecycleManager<B, P>, matcher: TransactionMatcher, config: SyncConfig) -> Self {
        Self { lifecycle, matcher, config }
    }

    pub fn lifecycle(&self) -> &LifecycleManager<B, P> {
        &self.lifecycle
    }

    pub fn matcher(&self) -> &TransactionMatcher {
        &self.matcher
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn db(&self) -> &B {
        self.lifecycle.db()
    }

    /// Syncs every connection that has not been revoked, a few at a time. Failures are reported per connection and
    /// never abort the run.
    pub async fn run_all(&self) -> SyncRunReport {
        let started_at = Utc::now();
        let connections = match self.db().fetch_connections(ConnectionQueryFilter::default()).await {
            Ok(c) => c,
            Err(e) => {
                error!("📬️ Could not load the connections to sync: {e}");
                return SyncRunReport { started_at, finished_at: Utc::now(), connections: vec![] };
            },
        };
        info!("📬️ Starting sync run over {} connection(s)", connections.len());
        let reports = stream::iter(connections.into_iter().map(|c| self.sync_connection(c.id)))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        let report = SyncRunReport { started_at, finished_at: Utc::now(), connections: reports };
        info!(
            "📬️ Sync run finished. {} completed, {} partial, {} failed, {} timed out, {} skipped. {} payment(s) matched.",
            report.count(SyncStatus::Completed),
            report.count(SyncStatus::PartialFailure),
            report.count(SyncStatus::Failed),
            report.count(SyncStatus::TimedOut),
            report.connections.iter().filter(|r| r.status.is_skipped()).count(),
            report.total_matched()
        );
        report
    }

    /// Syncs one connection.
    ///
    /// Returns straight away with [`SyncStatus::Busy`] if another task holds the connection. The sync itself runs
    /// under the configured time budget. Whatever the outcome, it is stored on the connection.
    pub async fn sync_connection(&self, id: ConnectionId) -> ConnectionSyncReport {
        let Some(claim) = self.lifecycle.try_claim(id) else {
            info!("📬️ Connection {id} is busy. Skipping this sync.");
            return ConnectionSyncReport::skipped(id, SyncStatus::Busy, None);
        };
        let started_at = Utc::now();
        let report = match tokio::time::timeout(self.config.budget, self.sync_claimed(&claim)).await {
            Ok(report) => report,
            Err(_) => {
                warn!("📬️ Sync of connection {id} ran over its budget of {:?} and was stopped", self.config.budget);
                let mut report = ConnectionSyncReport::new(id, started_at);
                report.message = Some(format!("Sync exceeded its time budget of {}s", self.config.budget.as_secs()));
                report.finish(SyncStatus::TimedOut)
            },
        };
        self.record_outcome(&claim, &report).await;
        report
    }

    async fn sync_claimed(&self, claim: &ConnectionClaim) -> ConnectionSyncReport {
        let id = claim.connection_id();
        let report = ConnectionSyncReport::new(id, Utc::now());
        let connection = match self.lifecycle.fetch_connection(claim).await {
            Ok(c) => c,
            Err(e) => return failed(report, e.to_string()),
        };
        match connection.state {
            ConnectionState::Revoked => return ConnectionSyncReport::skipped(id, SyncStatus::Revoked, None),
            ConnectionState::ReauthorizationRequired => {
                let msg = format!("Connection must be reauthorized by {}", connection.organizer);
                return ConnectionSyncReport::skipped(id, SyncStatus::NeedsReauthorization, Some(msg));
            },
            _ => {},
        }
        let today = Utc::now().date_naive();
        match self.db().try_consume_daily_sync(id, today, self.config.max_syncs_per_day).await {
            Ok(true) => {},
            Ok(false) => {
                info!("📬️ Connection {id} has used up its {} syncs for today", self.config.max_syncs_per_day);
                return ConnectionSyncReport::skipped(id, SyncStatus::DailyLimitReached, None);
            },
            Err(e) => return failed(report, e.to_string()),
        }
        let session = match self.lifecycle.ensure_usable(claim, connection).await {
            Ok((connection, credential)) => SyncSession { connection, credential },
            Err(e) => return unusable(report, e),
        };
        self.sync_accounts(claim, session, report).await
    }

    async fn sync_accounts(
        &self,
        claim: &ConnectionClaim,
        mut session: SyncSession,
        mut report: ConnectionSyncReport,
    ) -> ConnectionSyncReport {
        let external = match self.list_accounts(claim, &mut session).await {
            Ok(accounts) => accounts,
            Err(AccountFailure::Unusable(e)) => return unusable(report, e),
            Err(AccountFailure::Failed(msg)) => return failed(report, format!("Could not list accounts. {msg}")),
        };
        let accounts = match self.db().upsert_accounts(session.connection.id, &external).await {
            Ok(a) => a,
            Err(e) => return failed(report, e.to_string()),
        };
        debug!("📬️ Connection {} has {} account(s)", session.connection.id, accounts.len());
        for account in &accounts {
            match self.sync_account(claim, &mut session, account, &mut report).await {
                Ok(()) => {},
                Err(AccountFailure::Unusable(e)) => return unusable(report, e),
                Err(AccountFailure::Failed(msg)) => {
                    let account_id = &account.external_id;
                    warn!("📬️ Sync of account {account_id} on connection {} failed: {msg}", account.connection_id);
                    report.errors += 1;
                    report.failed_accounts.push(account.external_id.clone());
                    report.message = Some(msg);
                },
            }
        }
        let status = match report.failed_accounts.len() {
            0 => SyncStatus::Completed,
            n if n == accounts.len() => SyncStatus::Failed,
            _ => SyncStatus::PartialFailure,
        };
        report.finish(status)
    }

    async fn list_accounts(
        &self,
        claim: &ConnectionClaim,
        session: &mut SyncSession,
    ) -> Result<Vec<ExternalAccount>, AccountFailure> {
        let provider = self.lifecycle.providers().get(session.connection.provider).map_err(AccountFailure::Unusable)?;
        let retry = self.lifecycle.retry_policy();
        let first = retry.run("list accounts", || provider.list_accounts(&session.credential)).await;
        let result = match first {
            Err(ProviderError::Unauthorized(msg)) => {
                debug!("📬️ Listing accounts was not authorized ({msg}). Refreshing once before giving up.");
                self.refresh_session(claim, session).await?;
                retry.run("list accounts", || provider.list_accounts(&session.credential)).await
            },
            result => result,
        };
        match result {
            Ok(accounts) => Ok(accounts),
            Err(e) => Err(self.provider_failure(claim, session, e).await),
        }
    }

    /// Fetches and processes pages for one account until the provider has nothing more, saving the cursor after
    /// each page.
    async fn sync_account(
        &self,
        claim: &ConnectionClaim,
        session: &mut SyncSession,
        account: &BankAccount,
        report: &mut ConnectionSyncReport,
    ) -> Result<(), AccountFailure> {
        let mut cursor = self.db().fetch_cursor(account.id).await?;
        let mut refreshed = false;
        let mut pages = 0;
        while pages < self.config.max_pages_per_account {
            let fetched = self.fetch_page(session, account, &cursor).await;
            let page = match fetched {
                Ok(page) => page,
                Err(ProviderError::Unauthorized(msg)) if !refreshed => {
                    debug!("📬️ Fetching transactions was not authorized ({msg}). Refreshing once before giving up.");
                    refreshed = true;
                    self.refresh_session(claim, session).await?;
                    continue;
                },
                Err(e) => return Err(self.provider_failure(claim, session, e).await),
            };
            pages += 1;
            report.fetched += page.transactions.len() as u64;
            for transaction in page.transactions {
                self.process_transaction(&session.connection, account, transaction, report).await?;
            }
            self.db().save_cursor(account.id, &page.next_cursor).await?;
            if !page.has_more {
                return Ok(());
            }
            if page.next_cursor == cursor {
                warn!(
                    "📬️ Provider returned the same cursor for account {} twice. Stopping here to avoid a loop.",
                    account.external_id
                );
                return Ok(());
            }
            cursor = page.next_cursor;
        }
        info!(
            "📬️ Fetched {} pages for account {}. The rest will be picked up on the next sync.",
            self.config.max_pages_per_account, account.external_id
        );
        Ok(())
    }

    async fn fetch_page(
        &self,
        session: &SyncSession,
        account: &BankAccount,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError> {
        let provider = self
            .lifecycle
            .providers()
            .get(session.connection.provider)
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;
        self.lifecycle
            .retry_policy()
            .run("fetch transactions", || {
                provider.fetch_transactions(&session.credential, &account.external_id, cursor)
            })
            .await
    }

    async fn refresh_session(&self, claim: &ConnectionClaim, session: &mut SyncSession) -> Result<(), AccountFailure> {
        let (connection, credential) = self
            .lifecycle
            .refresh(claim, session.connection.clone(), session.credential.clone())
            .await
            .map_err(AccountFailure::Unusable)?;
        session.connection = connection;
        session.credential = credential;
        Ok(())
    }

    /// Credential errors that survive a refresh make the connection unusable. Everything else only fails the
    /// current account.
    async fn provider_failure(
        &self,
        claim: &ConnectionClaim,
        session: &mut SyncSession,
        error: ProviderError,
    ) -> AccountFailure {
        if !error.requires_reauthorization() {
            return AccountFailure::Failed(error.to_string());
        }
        let event = LifecycleEvent::IrrecoverableError;
        match self.lifecycle.mark_reauthorization_required(claim, &session.connection, event, &error.to_string()).await
        {
            Ok(connection) => {
                let e = LifecycleError::NotUsable { id: connection.id, state: connection.state };
                session.connection = connection;
                AccountFailure::Unusable(e)
            },
            Err(e) => AccountFailure::Unusable(e),
        }
    }

    async fn process_transaction(
        &self,
        connection: &BankConnection,
        account: &BankAccount,
        transaction: RawTransaction,
        report: &mut ConnectionSyncReport,
    ) -> Result<(), BankSyncDatabaseError> {
        let booked = transaction.is_booked();
        let new_record = NewTransactionRecord::new(connection, account, transaction.clone());
        let record = match self.db().insert_transaction(new_record).await? {
            InsertTransactionResult::Inserted(record) => {
                report.stored += 1;
                record
            },
            InsertTransactionResult::AlreadyExists(record) => match record.state {
                // A previous sync stored it, but stopped before evaluating it
                TransactionState::Unchecked => record,
                TransactionState::Pending if booked => {
                    debug!("📬️ Pending transaction {} has been booked", record.external_id);
                    self.db().promote_pending_transaction(record.id, &transaction).await?
                },
                _ => {
                    trace!("📬️ Transaction {} has been seen before. Skipping.", record.external_id);
                    report.duplicates += 1;
                    return Ok(());
                },
            },
        };
        if record.state == TransactionState::Pending {
            report.pending += 1;
            return Ok(());
        }
        self.evaluate_transaction(record, report).await
    }

    /// Runs a booked transaction through the matcher and acts on the result.
    async fn evaluate_transaction(
        &self,
        record: TransactionRecord,
        report: &mut ConnectionSyncReport,
    ) -> Result<(), BankSyncDatabaseError> {
        let db = self.db();
        if record.amount.is_zero() {
            report.ignored += 1;
            let update = TransactionUpdate::with_message("Zero amount");
            db.update_transaction_state(record.id, TransactionState::Discarded, update).await?;
            return Ok(());
        }
        if record.amount.is_negative() {
            return self.evaluate_outgoing(record, report).await;
        }
        let existing = existing_payments(db, &record).await?;
        if !existing.is_empty() {
            debug!("📬️ Transaction {} already has {} payment(s) on the host", record.external_id, existing.len());
            let codes = existing.into_iter().map(|p| p.order_code).collect();
            report.matched += 1;
            db.update_transaction_state(record.id, TransactionState::Matched, TransactionUpdate::matched(codes)).await?;
            return Ok(());
        }
        let orders = db.fetch_awaiting_orders(&record.organizer, &record.currency).await?;
        match self.matcher.evaluate(&MatchInput::from(&record), &orders) {
            MatchResolution::AutoMatch(suggestion) => {
                let Some(order) = orders.iter().find(|o| o.id == suggestion.order_id) else {
                    return Err(BankSyncDatabaseError::OrderNotFound(suggestion.order_code));
                };
                match settle_payment(db, self.lifecycle.producers(), &record, order, record.amount, false).await {
                    Ok(_) => {
                        report.matched += 1;
                        let mut update = TransactionUpdate::matched(vec![order.code.clone()]);
                        if record.amount < order.pending {
                            debug!("📬️ Transaction {} pays part of order {}", record.external_id, order.code);
                            update = update.partial(record.partial_payment_group(&order.code));
                        }
                        db.update_transaction_state(record.id, TransactionState::Matched, update).await?;
                    },
                    Err(SettlementError::Database(e)) => return Err(e),
                    Err(e) => {
                        report.needs_review += 1;
                        let update = TransactionUpdate {
                            suggestions: vec![suggestion],
                            message: Some(e.to_string()),
                            ..Default::default()
                        };
                        db.update_transaction_state(record.id, TransactionState::NeedsReview, update).await?;
                    },
                }
            },
            MatchResolution::Overpayment(suggestion) => {
                report.needs_review += 1;
                let message = match orders.iter().find(|o| o.id == suggestion.order_id) {
                    Some(order) => format!(
                        "Transaction is for {} {}, but order {} only owes {}",
                        record.amount.to_decimal_string(&record.currency),
                        record.currency,
                        order.code,
                        order.pending.to_decimal_string(&order.currency)
                    ),
                    None => format!("Transaction is for more than order {} owes", suggestion.order_code),
                };
                let update =
                    TransactionUpdate { suggestions: vec![suggestion], message: Some(message), ..Default::default() };
                db.update_transaction_state(record.id, TransactionState::NeedsReview, update).await?;
            },
            MatchResolution::Ambiguous { suggestions, covers_amount } => {
                report.ambiguous += 1;
                let message = if covers_amount {
                    "Several orders are referenced and their outstanding amounts add up to this payment. It can be \
                     approved as a split."
                } else {
                    "Several orders are referenced"
                };
                let update =
                    TransactionUpdate { suggestions, message: Some(message.to_string()), ..Default::default() };
                db.update_transaction_state(record.id, TransactionState::Ambiguous, update).await?;
            },
            MatchResolution::NeedsReview(suggestions) => {
                report.needs_review += 1;
                let update = TransactionUpdate::with_suggestions(suggestions);
                db.update_transaction_state(record.id, TransactionState::NeedsReview, update).await?;
            },
            MatchResolution::NoMatch => {
                report.unmatched += 1;
                let (state, update) = match self.settled_order_reference(&record).await? {
                    Some(msg) => (TransactionState::Error, TransactionUpdate::with_message(msg)),
                    None => (TransactionState::Unmatched, TransactionUpdate::default()),
                };
                db.update_transaction_state(record.id, state, update).await?;
            },
        }
        Ok(())
    }

    /// Money leaving the account. If its reference names exactly one order it is booked as a refund of that order,
    /// completing a refund the host requested where there is one. Anything else stays `Outgoing`.
    async fn evaluate_outgoing(
        &self,
        record: TransactionRecord,
        report: &mut ConnectionSyncReport,
    ) -> Result<(), BankSyncDatabaseError> {
        let db = self.db();
        let orders = self.referenced_orders(&record).await?;
        let (state, update) = match orders.as_slice() {
            [order] if order.currency == record.currency => {
                let amount = record.amount.abs();
                let recording = db.record_refund(record.connection_id, &record.external_id, order, amount).await?;
                if recording.newly_recorded {
                    info!(
                        "💰️ Refund of {} {} to order {} booked from transaction {} ({:?})",
                        amount.to_decimal_string(&record.currency),
                        record.currency,
                        order.code,
                        record.external_id,
                        recording.refund.status
                    );
                }
                report.refunded += 1;
                let update = TransactionUpdate {
                    matched_orders: vec![order.code.clone()],
                    message: Some(format!("Refund #{} of order {}", recording.refund.id, order.code)),
                    ..Default::default()
                };
                (TransactionState::Refunded, update)
            },
            [order] => {
                report.ignored += 1;
                let msg = format!("Reference names order {}, which is in {}", order.code, order.currency);
                (TransactionState::Outgoing, TransactionUpdate::with_message(msg))
            },
            [] => {
                report.ignored += 1;
                (TransactionState::Outgoing, TransactionUpdate::default())
            },
            several => {
                report.ignored += 1;
                let codes = several.iter().map(|o| o.code.as_str()).collect::<Vec<_>>().join(", ");
                let msg = format!("Reference names several orders ({codes}), so it is not booked as a refund");
                (TransactionState::Outgoing, TransactionUpdate::with_message(msg))
            },
        };
        db.update_transaction_state(record.id, state, update).await?;
        Ok(())
    }

    /// Every order named in the transaction's reference, whatever its status.
    async fn referenced_orders(&self, record: &TransactionRecord) -> Result<Vec<Order>, BankSyncDatabaseError> {
        let patterns = self.matcher.patterns();
        let mut orders: Vec<Order> = Vec::new();
        for code in patterns.order_codes(&record.remittance) {
            if let Some(order) = self.db().fetch_order_by_code(&record.organizer, &code).await? {
                if !orders.iter().any(|o| o.id == order.id) {
                    orders.push(order);
                }
            }
        }
        for invoice in patterns.invoice_references(&record.remittance) {
            if let Some(order) = self.db().fetch_order_by_invoice(&record.organizer, &invoice.raw).await? {
                if !orders.iter().any(|o| o.id == order.id) {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }

    /// A reference to an order that can no longer take payments (paid, cancelled or expired) is worth flagging:
    /// someone probably paid twice or too late.
    async fn settled_order_reference(
        &self,
        record: &TransactionRecord,
    ) -> Result<Option<String>, BankSyncDatabaseError> {
        let patterns = self.matcher.patterns();
        for code in patterns.order_codes(&record.remittance) {
            if let Some(order) = self.db().fetch_order_by_code(&record.organizer, &code).await? {
                if order.status != OrderStatus::AwaitingPayment {
                    return Ok(Some(format!("Reference names order {}, which is {:?}", order.code, order.status)));
                }
            }
        }
        for invoice in patterns.invoice_references(&record.remittance) {
            if let Some(order) = self.db().fetch_order_by_invoice(&record.organizer, &invoice.raw).await? {
                if order.status != OrderStatus::AwaitingPayment {
                    let msg = format!(
                        "Reference names invoice {} of order {}, which is {:?}",
                        invoice.raw, order.code, order.status
                    );
                    return Ok(Some(msg));
                }
            }
        }
        Ok(None)
    }

    /// Stores the outcome on the connection and feeds the failure counter.
    async fn record_outcome(&self, claim: &ConnectionClaim, report: &ConnectionSyncReport) {
        if report.status.is_skipped() {
            return;
        }
        let id = claim.connection_id();
        if let Err(e) = self.db().record_sync_outcome(id, report).await {
            error!("📬️ Could not store the sync outcome for connection {id}: {e}");
        }
        let connection = match self.lifecycle.fetch_connection(claim).await {
            Ok(c) => c,
            Err(e) => {
                error!("📬️ Could not reload connection {id} after syncing: {e}");
                return;
            },
        };
        let result = if report.status.is_failure() {
            let reason = report.message.clone().unwrap_or_else(|| format!("Sync {:?}", report.status));
            self.lifecycle.record_failure(&connection, &reason).await.map(|_| ())
        } else {
            self.lifecycle.record_success(&connection).await
        };
        if let Err(e) = result {
            error!("📬️ Could not update the failure count for connection {id}: {e}");
        }
    }
}

fn failed(mut report: ConnectionSyncReport, message: String) -> ConnectionSyncReport {
    warn!("📬️ Sync of connection {} failed: {message}", report.connection_id);
    report.message = Some(message);
    report.finish(SyncStatus::Failed)
}

fn unusable(mut report: ConnectionSyncReport, error: LifecycleError) -> ConnectionSyncReport {
    let status = if error.is_revoked() {
        SyncStatus::Revoked
    } else if error.needs_reauthorization() {
        SyncStatus::NeedsReauthorization
    } else {
        SyncStatus::Failed
    };
    info!("📬️ Connection {} cannot be synced ({status:?}): {error}", report.connection_id);
    report.message = Some(error.to_string());
    report.finish(status)
}
