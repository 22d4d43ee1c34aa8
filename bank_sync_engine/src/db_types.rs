use std::{fmt::Display, str::FromStr};

pub use bank_providers::{BookingStatus, Credential, ExternalAccount, PageCursor, ProviderKind, RawTransaction};
pub use bank_sync_common::{CurrencyCode, MinorUnits};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------    ConnectionId     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ConnectionId(i64);

impl ConnectionId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ConnectionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

//--------------------------------------   ConnectionState   ---------------------------------------------------------
/// The lifecycle states of a bank connection.
///
/// `Unconnected` and `AuthorizationPending` only ever apply to authorization attempts. A connection record is born
/// `Connected` when the callback succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum ConnectionState {
    Unconnected,
    AuthorizationPending,
    Connected,
    /// Consent is about to run out. Sync continues while a refresh is attempted.
    ExpiringSoon,
    /// A credential refresh is in flight.
    Reauthorizing,
    /// The grant is gone. Sync is suspended until the organizer goes through the redirect flow again.
    ReauthorizationRequired,
    /// Terminal. The record is kept for history.
    Revoked,
}

impl ConnectionState {
    /// Can sync run for a connection in this state (possibly after a refresh)?
    pub fn is_syncable(&self) -> bool {
        matches!(self, Self::Connected | Self::ExpiringSoon | Self::Reauthorizing)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconnected => "Unconnected",
            Self::AuthorizationPending => "AuthorizationPending",
            Self::Connected => "Connected",
            Self::ExpiringSoon => "ExpiringSoon",
            Self::Reauthorizing => "Reauthorizing",
            Self::ReauthorizationRequired => "ReauthorizationRequired",
            Self::Revoked => "Revoked",
        };
        f.write_str(s)
    }
}

impl FromStr for ConnectionState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unconnected" => Ok(Self::Unconnected),
            "AuthorizationPending" => Ok(Self::AuthorizationPending),
            "Connected" => Ok(Self::Connected),
            "ExpiringSoon" => Ok(Self::ExpiringSoon),
            "Reauthorizing" => Ok(Self::Reauthorizing),
            "ReauthorizationRequired" => Ok(Self::ReauthorizationRequired),
            "Revoked" => Ok(Self::Revoked),
            s => Err(ConversionError(format!("Invalid connection state: {s}"))),
        }
    }
}

//--------------------------------------  AuthorizationAttempt  ------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationAttempt {
    pub id: i64,
    pub state_token: String,
    pub organizer: String,
    pub provider: ProviderKind,
    pub institution_id: String,
    pub redirect_uri: String,
    /// The provider's handle for the pending grant (GoCardless requisition id)
    pub provider_reference: Option<String>,
    /// Set when the attempt reauthorizes an existing connection
    pub connection_id: Option<ConnectionId>,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuthorizationAttempt {
    pub state_token: String,
    pub organizer: String,
    pub provider: ProviderKind,
    pub institution_id: String,
    pub redirect_uri: String,
    pub provider_reference: Option<String>,
    pub connection_id: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    BankConnection    --------------------------------------------------------
/// A bank connection, without its credential. Credentials are only handed out by
/// [`crate::traits::ConnectionManagement::fetch_credential`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankConnection {
    pub id: ConnectionId,
    pub organizer: String,
    pub provider: ProviderKind,
    pub institution_id: String,
    pub state: ConnectionState,
    pub consent_expires_at: DateTime<Utc>,
    pub consecutive_failures: i64,
    pub needs_attention: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_report: Option<ConnectionSyncReport>,
    pub sync_day: Option<NaiveDate>,
    pub syncs_today: i64,
    pub expiry_warning_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub organizer: String,
    pub provider: ProviderKind,
    pub institution_id: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionQueryFilter {
    pub organizer: Option<String>,
    pub include_revoked: bool,
}

impl ConnectionQueryFilter {
    pub fn for_organizer<S: Into<String>>(organizer: S) -> Self {
        Self { organizer: Some(organizer.into()), include_revoked: false }
    }

    pub fn with_revoked(mut self) -> Self {
        self.include_revoked = true;
        self
    }
}

//--------------------------------------     BankAccount      --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct BankAccount {
    pub id: i64,
    pub connection_id: ConnectionId,
    pub external_id: String,
    pub iban: Option<String>,
    pub currency: Option<CurrencyCode>,
    pub display_name: Option<String>,
    pub owner_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   TransactionState   --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum TransactionState {
    /// Stored, not yet evaluated. A record left in this state by an interrupted sync is picked up again.
    Unchecked,
    /// Not booked yet. Re-evaluated when the booked version arrives.
    Pending,
    Matched,
    /// More than one order has high-confidence evidence
    Ambiguous,
    /// Only weak evidence; an admin has to decide
    NeedsReview,
    Unmatched,
    /// Money leaving the account that is not a refund of a known order. Kept for display only.
    Outgoing,
    /// Money returned to a customer, recorded as a refund of the referenced order
    Refunded,
    /// Zero amounts, or dismissed by an admin
    Discarded,
    /// The reference points at an order that can no longer take payments
    Error,
}

impl TransactionState {
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Ambiguous | Self::NeedsReview | Self::Unmatched | Self::Error)
    }

    pub fn review_states() -> Vec<Self> {
        vec![Self::Ambiguous, Self::NeedsReview, Self::Unmatched, Self::Error]
    }
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for TransactionState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unchecked" => Ok(Self::Unchecked),
            "Pending" => Ok(Self::Pending),
            "Matched" => Ok(Self::Matched),
            "Ambiguous" => Ok(Self::Ambiguous),
            "NeedsReview" => Ok(Self::NeedsReview),
            "Unmatched" => Ok(Self::Unmatched),
            "Outgoing" => Ok(Self::Outgoing),
            "Refunded" => Ok(Self::Refunded),
            "Discarded" => Ok(Self::Discarded),
            "Error" => Ok(Self::Error),
            s => Err(ConversionError(format!("Invalid transaction state: {s}"))),
        }
    }
}

//--------------------------------------   Match suggestions   -------------------------------------------------------
/// Confidence tiers. The derived ordering is meaningful: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchTier {
    Low,
    Medium,
    High,
}

impl Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub order_id: i64,
    pub order_code: String,
    pub tier: MatchTier,
    /// Human readable reason, e.g. "order code AB12CD in reference"
    pub evidence: String,
    pub outstanding: MinorUnits,
    pub amount_matches: bool,
}

//--------------------------------------  TransactionRecord   --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub connection_id: ConnectionId,
    pub account_id: i64,
    pub organizer: String,
    pub external_id: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub value_date: Option<NaiveDate>,
    pub booking_date: Option<NaiveDate>,
    pub payer_name: Option<String>,
    pub payer_iban: Option<String>,
    pub remittance: String,
    pub booking_status: BookingStatus,
    pub state: TransactionState,
    pub matched_orders: Vec<String>,
    pub suggestions: Vec<MatchSuggestion>,
    pub message: Option<String>,
    /// Set when the transaction pays only part of what its order owes. Instalments paid towards the same order on
    /// the same day share a group id.
    pub payment_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn is_partial_payment(&self) -> bool {
        self.payment_group_id.is_some()
    }

    /// The date the bank booked the money, falling back to the value date and then to when it was first seen.
    pub fn effective_date(&self) -> NaiveDate {
        self.booking_date.or(self.value_date).unwrap_or_else(|| self.created_at.date_naive())
    }

    /// Group id for a partial payment of `order_code` by this transaction.
    pub fn partial_payment_group(&self, order_code: &str) -> String {
        format!("{order_code}_{}", self.effective_date().format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone)]
pub struct NewTransactionRecord {
    pub connection_id: ConnectionId,
    pub account_id: i64,
    pub organizer: String,
    pub transaction: RawTransaction,
    pub state: TransactionState,
}

impl NewTransactionRecord {
    pub fn new(connection: &BankConnection, account: &BankAccount, transaction: RawTransaction) -> Self {
        let state = if transaction.is_booked() { TransactionState::Unchecked } else { TransactionState::Pending };
        Self {
            connection_id: connection.id,
            account_id: account.id,
            organizer: connection.organizer.clone(),
            transaction,
            state,
        }
    }
}

/// The outcome of evaluating a transaction, as stored on the record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionUpdate {
    pub matched_orders: Vec<String>,
    pub suggestions: Vec<MatchSuggestion>,
    pub message: Option<String>,
    pub payment_group_id: Option<String>,
}

impl TransactionUpdate {
    pub fn matched(codes: Vec<String>) -> Self {
        Self { matched_orders: codes, ..Default::default() }
    }

    pub fn with_suggestions(suggestions: Vec<MatchSuggestion>) -> Self {
        Self { suggestions, ..Default::default() }
    }

    pub fn with_message<S: Into<String>>(message: S) -> Self {
        Self { message: Some(message.into()), ..Default::default() }
    }

    pub fn partial(mut self, group_id: String) -> Self {
        self.payment_group_id = Some(group_id);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionQueryFilter {
    pub organizer: Option<String>,
    pub connection_id: Option<ConnectionId>,
    pub states: Vec<TransactionState>,
    pub limit: Option<i64>,
}

impl TransactionQueryFilter {
    pub fn with_organizer<S: Into<String>>(mut self, organizer: S) -> Self {
        self.organizer = Some(organizer.into());
        self
    }

    pub fn with_connection(mut self, id: ConnectionId) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn with_state(mut self, state: TransactionState) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_states(mut self, states: Vec<TransactionState>) -> Self {
        self.states.extend(states);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

//--------------------------------------        Orders        --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    AwaitingPayment,
    Paid,
    Cancelled,
    Expired,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An order on the host platform, as far as reconciliation cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: i64,
    pub organizer: String,
    pub event: String,
    pub code: String,
    pub currency: CurrencyCode,
    pub total: MinorUnits,
    /// What is still owed
    pub pending: MinorUnits,
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub invoice_numbers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub organizer: String,
    pub event: String,
    pub code: String,
    pub currency: CurrencyCode,
    pub total: MinorUnits,
    pub customer_name: Option<String>,
    pub invoice_numbers: Vec<String>,
}

impl NewOrder {
    pub fn new(organizer: &str, event: &str, code: &str, currency: CurrencyCode, total: MinorUnits) -> Self {
        Self {
            organizer: organizer.to_string(),
            event: event.to_string(),
            code: code.to_string(),
            currency,
            total,
            customer_name: None,
            invoice_numbers: vec![],
        }
    }

    pub fn with_customer_name<S: Into<String>>(mut self, name: S) -> Self {
        self.customer_name = Some(name.into());
        self
    }

    pub fn with_invoice<S: Into<String>>(mut self, invoice: S) -> Self {
        self.invoice_numbers.push(invoice.into());
        self
    }
}

//--------------------------------------       Payments       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum PaymentStatus {
    Created,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Payment {
    pub id: i64,
    pub connection_id: ConnectionId,
    pub transaction_id: String,
    pub order_id: i64,
    pub order_code: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// A payment to be created on the host. The host keys it on (connection, transaction id, order).
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub connection_id: ConnectionId,
    pub transaction_id: String,
    pub order_id: i64,
    pub order_code: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
}

//--------------------------------------       Refunds        --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum RefundStatus {
    /// Requested on the host, waiting for the money to leave the account
    Requested,
    /// A requested refund that a bank transaction has carried out
    Done,
    /// Money sent back without a refund being requested on the host first
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Refund {
    pub id: i64,
    pub order_id: i64,
    pub order_code: String,
    /// Always positive. The bank transaction that carries it out has the negated amount.
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub status: RefundStatus,
    pub connection_id: Option<ConnectionId>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A refund requested by the host, to be carried out by a bank transfer.
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub order_id: i64,
    pub order_code: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
}

//--------------------------------------     Sync reports     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Completed,
    /// Some accounts failed, the others were synced
    PartialFailure,
    Failed,
    /// Another sync holds the connection
    Busy,
    DailyLimitReached,
    NeedsReauthorization,
    Revoked,
    TimedOut,
}

impl SyncStatus {
    /// Outcomes that count towards the consecutive-failure escalation
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Outcomes where no sync work was attempted at all
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Busy | Self::DailyLimitReached | Self::NeedsReauthorization | Self::Revoked)
    }
}

/// Counts from one sync of one connection. Stored as the connection's last sync outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSyncReport {
    pub connection_id: ConnectionId,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: u64,
    pub stored: u64,
    pub matched: u64,
    pub ambiguous: u64,
    pub needs_review: u64,
    pub unmatched: u64,
    pub duplicates: u64,
    pub pending: u64,
    #[serde(default)]
    pub refunded: u64,
    pub ignored: u64,
    pub errors: u64,
    pub failed_accounts: Vec<String>,
    pub message: Option<String>,
}

impl ConnectionSyncReport {
    pub fn new(connection_id: ConnectionId, started_at: DateTime<Utc>) -> Self {
        Self {
            connection_id,
            status: SyncStatus::Completed,
            started_at,
            finished_at: started_at,
            fetched: 0,
            stored: 0,
            matched: 0,
            ambiguous: 0,
            needs_review: 0,
            unmatched: 0,
            duplicates: 0,
            pending: 0,
            refunded: 0,
            ignored: 0,
            errors: 0,
            failed_accounts: vec![],
            message: None,
        }
    }

    pub fn skipped(connection_id: ConnectionId, status: SyncStatus, message: Option<String>) -> Self {
        let now = Utc::now();
        Self { status, message, ..Self::new(connection_id, now) }
    }

    pub fn finish(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub connections: Vec<ConnectionSyncReport>,
}

impl SyncRunReport {
    pub fn count(&self, status: SyncStatus) -> usize {
        self.connections.iter().filter(|r| r.status == status).count()
    }

    pub fn total_matched(&self) -> u64 {
        self.connections.iter().map(|r| r.matched).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn states_round_trip_through_strings() {
        for state in [
            ConnectionState::Unconnected,
            ConnectionState::AuthorizationPending,
            ConnectionState::Connected,
            ConnectionState::ExpiringSoon,
            ConnectionState::Reauthorizing,
            ConnectionState::ReauthorizationRequired,
            ConnectionState::Revoked,
        ] {
            assert_eq!(state.to_string().parse::<ConnectionState>().unwrap(), state);
        }
        assert_eq!("NeedsReview".parse::<TransactionState>().unwrap(), TransactionState::NeedsReview);
        assert!("Bogus".parse::<TransactionState>().is_err());
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(MatchTier::High > MatchTier::Medium);
        assert!(MatchTier::Medium > MatchTier::Low);
    }
}
