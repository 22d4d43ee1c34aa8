use bank_providers::{Credential, ExternalAccount, PageCursor, ProviderKind};
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    db_types::{
        AuthorizationAttempt,
        BankAccount,
        BankConnection,
        ConnectionId,
        ConnectionQueryFilter,
        ConnectionState,
        ConnectionSyncReport,
        NewAuthorizationAttempt,
        NewConnection,
    },
    traits::BankSyncDatabaseError,
};

/// Storage for bank connections and everything hanging off them.
///
/// Connection state is only ever changed by the lifecycle manager while it holds the connection's claim. Backends do
/// not validate transitions.
#[allow(async_fn_in_trait)]
pub trait ConnectionManagement {
    /// Stores a new authorization attempt in the `AuthorizationPending` state.
    async fn insert_authorization_attempt(
        &self,
        attempt: NewAuthorizationAttempt,
    ) -> Result<AuthorizationAttempt, BankSyncDatabaseError>;

    async fn fetch_authorization_attempt(
        &self,
        state_token: &str,
    ) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError>;

    async fn update_attempt_state(
        &self,
        id: i64,
        state: ConnectionState,
    ) -> Result<AuthorizationAttempt, BankSyncDatabaseError>;

    /// Moves the attempt from `from` to `to`, but only if it is still in `from`. Returns `None` if another caller
    /// moved it first.
    async fn transition_attempt_state(
        &self,
        id: i64,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<Option<AuthorizationAttempt>, BankSyncDatabaseError>;

    /// Moves every attempt still pending that was created before `cutoff` back to `Unconnected`.
    /// Returns the number of attempts that were expired.
    async fn expire_authorization_attempts(&self, cutoff: DateTime<Utc>) -> Result<u64, BankSyncDatabaseError>;

    /// Creates a `Connected` connection and stores its credential encrypted.
    ///
    /// Fails with [`BankSyncDatabaseError::ConnectionAlreadyExists`] if a non-revoked connection for the same
    /// (organizer, provider, institution) exists.
    async fn insert_connection(&self, connection: NewConnection) -> Result<BankConnection, BankSyncDatabaseError>;

    async fn fetch_connection(&self, id: ConnectionId) -> Result<Option<BankConnection>, BankSyncDatabaseError>;

    /// Fetches the non-revoked connection for the given triple, if there is one.
    async fn fetch_active_connection(
        &self,
        organizer: &str,
        provider: ProviderKind,
        institution_id: &str,
    ) -> Result<Option<BankConnection>, BankSyncDatabaseError>;

    /// Connections ordered by id.
    async fn fetch_connections(
        &self,
        filter: ConnectionQueryFilter,
    ) -> Result<Vec<BankConnection>, BankSyncDatabaseError>;

    /// Decrypts and returns the credential for the connection.
    async fn fetch_credential(&self, id: ConnectionId) -> Result<Credential, BankSyncDatabaseError>;

    async fn update_connection_state(
        &self,
        id: ConnectionId,
        state: ConnectionState,
    ) -> Result<BankConnection, BankSyncDatabaseError>;

    /// Replaces the stored credential, updates the consent expiry from it and sets the new state in one write.
    /// If the consent expiry changes, the expiry warning marker is cleared.
    async fn store_credential(
        &self,
        id: ConnectionId,
        credential: &Credential,
        state: ConnectionState,
    ) -> Result<BankConnection, BankSyncDatabaseError>;

    /// Increments the consecutive failure counter and records the error. Returns the new counter value.
    async fn record_failure(&self, id: ConnectionId, message: &str) -> Result<i64, BankSyncDatabaseError>;

    /// Resets the consecutive failure counter and clears the `needs_attention` flag.
    async fn reset_failures(&self, id: ConnectionId) -> Result<(), BankSyncDatabaseError>;

    async fn set_needs_attention(&self, id: ConnectionId, needs_attention: bool) -> Result<(), BankSyncDatabaseError>;

    /// Stores the report as the connection's last sync outcome.
    async fn record_sync_outcome(
        &self,
        id: ConnectionId,
        report: &ConnectionSyncReport,
    ) -> Result<(), BankSyncDatabaseError>;

    /// Atomically uses up one of the connection's daily syncs. The counter restarts when `today` differs from the
    /// day of the last sync. Returns `false` if `max_per_day` syncs already ran today.
    async fn try_consume_daily_sync(
        &self,
        id: ConnectionId,
        today: NaiveDate,
        max_per_day: i64,
    ) -> Result<bool, BankSyncDatabaseError>;

    async fn mark_expiry_warning_sent(&self, id: ConnectionId, at: DateTime<Utc>) -> Result<(), BankSyncDatabaseError>;

    /// Inserts accounts that are not known yet and refreshes the details of those that are. Returns all accounts of
    /// the connection that are in `accounts`.
    async fn upsert_accounts(
        &self,
        id: ConnectionId,
        accounts: &[ExternalAccount],
    ) -> Result<Vec<BankAccount>, BankSyncDatabaseError>;

    async fn fetch_accounts(&self, id: ConnectionId) -> Result<Vec<BankAccount>, BankSyncDatabaseError>;

    /// The stored cursor for the account, or [`PageCursor::Start`] if nothing has been ingested yet.
    async fn fetch_cursor(&self, account_id: i64) -> Result<PageCursor, BankSyncDatabaseError>;

    async fn save_cursor(&self, account_id: i64, cursor: &PageCursor) -> Result<(), BankSyncDatabaseError>;
}
