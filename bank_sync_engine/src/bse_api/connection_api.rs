//! Authorizing, reauthorizing and disconnecting bank connections.
//!
//! Authorization is a redirect flow. [`ConnectionApi::begin_authorization`] asks the provider for a URL to send the
//! account holder to, and remembers the signed state token that comes with it. When the bank redirects back,
//! [`ConnectionApi::complete_authorization`] checks the state token, exchanges the code for a credential and creates
//! the connection (or refreshes the grant on an existing one). A tampered, unknown or stale state never creates a
//! connection, and neither does a state issued for a different redirect URI. Each attempt is claimed before its code
//! is exchanged, so a callback that arrives twice creates at most one connection.
use std::fmt::Debug;

use bank_providers::{AuthorizationRequest, AuthorizationStart, BankProvider, ProviderError, ProviderKind};
use chrono::{Duration, Utc};
use log::*;
use rand::{thread_rng, RngCore};
use serde::Serialize;

use crate::{
    bse_api::errors::ConnectionApiError,
    db_types::{
        AuthorizationAttempt,
        BankAccount,
        BankConnection,
        ConnectionId,
        ConnectionQueryFilter,
        ConnectionState,
        NewAuthorizationAttempt,
        NewConnection,
        TransactionQueryFilter,
        TransactionState,
    },
    lifecycle::{LifecycleEvent, LifecycleManager},
    traits::BankSyncDatabase,
};

/// What the admin UI shows for one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionOverview {
    pub connection: BankConnection,
    pub accounts: Vec<BankAccount>,
    /// Transactions on this connection that are waiting for a person to look at them
    pub open_reviews: usize,
}

pub struct ConnectionApi<B, P> {
    lifecycle: LifecycleManager<B, P>,
    authorization_timeout: Duration,
}

impl<B, P> Debug for ConnectionApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionApi (authorization timeout {}s)", self.authorization_timeout.num_seconds())
    }
}

impl<B: Clone, P: Clone> Clone for ConnectionApi<B, P> {
    fn clone(&self) -> Self {
        Self { lifecycle: self.lifecycle.clone(), authorization_timeout: self.authorization_timeout }
    }
}

impl<B, P> ConnectionApi<B, P>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    /// `authorization_timeout` is how long the account holder has to complete the redirect flow.
    pub fn new(lifecycle: LifecycleManager<B, P>, authorization_timeout: Duration) -> Self {
        Self { lifecycle, authorization_timeout }
    }

    pub fn lifecycle(&self) -> &LifecycleManager<B, P> {
        &self.lifecycle
    }

    fn db(&self) -> &B {
        self.lifecycle.db()
    }

    /// Starts the redirect flow for `organizer` at `institution_id`.
    ///
    /// If the organizer already has a live connection to the institution, the flow reauthorizes it when completed.
    pub async fn begin_authorization(
        &self,
        organizer: &str,
        provider: ProviderKind,
        institution_id: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationStart, ConnectionApiError> {
        let existing = self.db().fetch_active_connection(organizer, provider, institution_id).await?;
        let state = ConnectionState::Unconnected.apply(LifecycleEvent::AuthorizationStarted)?;
        let bank = self.lifecycle.providers().get(provider)?;
        let request = AuthorizationRequest {
            organizer: organizer.to_string(),
            institution_id: institution_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            nonce: new_nonce(),
            issued_at: Utc::now(),
        };
        let start = self
            .lifecycle
            .retry_policy()
            .run("build authorization url", || bank.build_authorization_url(&request))
            .await?;
        let attempt = NewAuthorizationAttempt {
            state_token: start.state.clone(),
            organizer: request.organizer,
            provider,
            institution_id: request.institution_id,
            redirect_uri: request.redirect_uri,
            provider_reference: start.provider_reference.clone(),
            connection_id: existing.as_ref().map(|c| c.id),
            created_at: request.issued_at,
        };
        let attempt = self.db().insert_authorization_attempt(attempt).await?;
        match &existing {
            Some(c) => info!("🔑️ Reauthorization of connection {} started ({})", c.id, attempt.state),
            None => info!("🔑️ {organizer} started connecting to {institution_id} via {provider} ({state})"),
        }
        Ok(start)
    }

    /// Starts the redirect flow again for an existing connection, e.g. one that needs reauthorization.
    pub async fn reauthorize(
        &self,
        id: ConnectionId,
        redirect_uri: &str,
    ) -> Result<AuthorizationStart, ConnectionApiError> {
        let connection = self.db().fetch_connection(id).await?.ok_or(ConnectionApiError::ConnectionNotFound(id))?;
        if connection.state.is_terminal() {
            return Err(ConnectionApiError::ConnectionRevoked(id));
        }
        self.begin_authorization(&connection.organizer, connection.provider, &connection.institution_id, redirect_uri)
            .await
    }

    /// Handles the provider's redirect back to us.
    ///
    /// `code` is the authorization code from the callback. GoCardless does not send one; the requisition id
    /// remembered when the flow started is used instead.
    pub async fn complete_authorization(
        &self,
        state: &str,
        code: Option<&str>,
    ) -> Result<BankConnection, ConnectionApiError> {
        let attempt = self
            .db()
            .fetch_authorization_attempt(state)
            .await?
            .ok_or_else(|| ConnectionApiError::InvalidState("Unknown authorization state".into()))?;
        if attempt.state != ConnectionState::AuthorizationPending {
            return Err(ConnectionApiError::InvalidState(format!(
                "Authorization attempt #{} is already {}",
                attempt.id, attempt.state
            )));
        }
        if attempt.created_at + self.authorization_timeout < Utc::now() {
            self.fail_attempt(&attempt).await?;
            return Err(ConnectionApiError::InvalidState("The authorization flow timed out".into()));
        }
        let code = match code.or(attempt.provider_reference.as_deref()) {
            Some(c) => c,
            None => {
                self.fail_attempt(&attempt).await?;
                return Err(ConnectionApiError::MissingCode);
            },
        };
        let granted = attempt.state.apply(LifecycleEvent::AuthorizationGranted)?;
        // Only one callback per attempt gets to exchange the code
        if self.db().transition_attempt_state(attempt.id, attempt.state, granted).await?.is_none() {
            return Err(ConnectionApiError::InvalidState(format!(
                "Authorization attempt #{} is already being completed",
                attempt.id
            )));
        }
        match self.connect(&attempt, code, state).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                warn!("🔑️ Authorization attempt #{} failed: {e}", attempt.id);
                self.fail_attempt(&attempt).await?;
                Err(e)
            },
        }
    }

    /// Exchanges the code and creates (or refreshes) the connection for a claimed attempt.
    async fn connect(
        &self,
        attempt: &AuthorizationAttempt,
        code: &str,
        state: &str,
    ) -> Result<BankConnection, ConnectionApiError> {
        let provider = self.lifecycle.providers().get(attempt.provider)?;
        let grant = provider.exchange_authorization(code, state).await.map_err(|e| match e {
            ProviderError::InvalidState(msg) => ConnectionApiError::InvalidState(msg),
            ProviderError::AuthorizationDenied(msg) => ConnectionApiError::AuthorizationDenied(msg),
            e => ConnectionApiError::ProviderError(e),
        })?;
        let claims = &grant.claims;
        if claims.organizer != attempt.organizer ||
            claims.institution_id != attempt.institution_id ||
            !claims.matches_redirect(&attempt.redirect_uri)
        {
            let msg = "State does not belong to this authorization attempt";
            return Err(ConnectionApiError::InvalidState(msg.into()));
        }
        let connection = match self.connection_to_reauthorize(attempt).await? {
            Some(existing) => {
                let claim = self.lifecycle.claim(existing.id).await;
                let existing = self.lifecycle.fetch_connection(&claim).await?;
                self.lifecycle.reauthorized(&claim, &existing, &grant.credential).await?
            },
            None => {
                let new_connection = NewConnection {
                    organizer: attempt.organizer.clone(),
                    provider: attempt.provider,
                    institution_id: attempt.institution_id.clone(),
                    credential: grant.credential,
                };
                let connection = self.db().insert_connection(new_connection).await?;
                info!(
                    "🔑️ New connection {} for {} at {} via {}",
                    connection.id, connection.organizer, connection.institution_id, connection.provider
                );
                connection
            },
        };
        Ok(connection)
    }

    /// The bank redirected back with an error, e.g. because the account holder declined. The attempt is closed and no
    /// connection is created.
    pub async fn cancel_authorization(&self, state: &str, reason: &str) -> Result<(), ConnectionApiError> {
        let attempt = self
            .db()
            .fetch_authorization_attempt(state)
            .await?
            .ok_or_else(|| ConnectionApiError::InvalidState("Unknown authorization state".into()))?;
        if attempt.state == ConnectionState::AuthorizationPending {
            info!("🔑️ Authorization attempt #{} was abandoned at the bank: {reason}", attempt.id);
            self.fail_attempt(&attempt).await?;
        }
        Ok(())
    }

    async fn connection_to_reauthorize(
        &self,
        attempt: &AuthorizationAttempt,
    ) -> Result<Option<BankConnection>, ConnectionApiError> {
        if let Some(id) = attempt.connection_id {
            match self.db().fetch_connection(id).await? {
                Some(c) if !c.state.is_terminal() => return Ok(Some(c)),
                _ => debug!("🔑️ Connection {id} was revoked during reauthorization. A new one will be created."),
            }
        }
        let existing =
            self.db().fetch_active_connection(&attempt.organizer, attempt.provider, &attempt.institution_id).await?;
        Ok(existing)
    }

    async fn fail_attempt(&self, attempt: &AuthorizationAttempt) -> Result<(), ConnectionApiError> {
        let next = attempt.state.apply(LifecycleEvent::AuthorizationFailed)?;
        self.db().update_attempt_state(attempt.id, next).await?;
        Ok(())
    }

    /// Revokes the connection, here and at the provider. Waits for any sync in progress on it to finish first.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<BankConnection, ConnectionApiError> {
        let claim = self.lifecycle.claim(id).await;
        let connection = self.lifecycle.fetch_connection(&claim).await?;
        let connection = self.lifecycle.disconnect(&claim, &connection).await?;
        info!("🔑️ Connection {id} disconnected");
        Ok(connection)
    }

    pub async fn connection(&self, id: ConnectionId) -> Result<Option<BankConnection>, ConnectionApiError> {
        Ok(self.db().fetch_connection(id).await?)
    }

    pub async fn connection_overview(&self, id: ConnectionId) -> Result<ConnectionOverview, ConnectionApiError> {
        let connection = self.db().fetch_connection(id).await?.ok_or(ConnectionApiError::ConnectionNotFound(id))?;
        let accounts = self.db().fetch_accounts(id).await?;
        let filter =
            TransactionQueryFilter::default().with_connection(id).with_states(TransactionState::review_states());
        let open_reviews = self.db().search_transactions(filter).await?.len();
        Ok(ConnectionOverview { connection, accounts, open_reviews })
    }

    pub async fn list_connections(
        &self,
        filter: ConnectionQueryFilter,
    ) -> Result<Vec<BankConnection>, ConnectionApiError> {
        Ok(self.db().fetch_connections(filter).await?)
    }

    /// Abandons redirect flows that were never completed within the authorization timeout.
    pub async fn expire_stale_authorizations(&self) -> Result<u64, ConnectionApiError> {
        let cutoff = Utc::now() - self.authorization_timeout;
        let expired = self.db().expire_authorization_attempts(cutoff).await?;
        if expired > 0 {
            info!("🔑️ {expired} unfinished authorization attempt(s) expired");
        }
        Ok(expired)
    }
}

fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
