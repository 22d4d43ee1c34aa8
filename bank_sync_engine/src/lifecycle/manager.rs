use bank_providers::{BankProvider, Credential, RetryPolicy};
use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{BankConnection, ConnectionId, ConnectionState},
    events::{ConsentExpiringEvent, EventProducers, ReauthorizationRequiredEvent, SyncFailureEscalatedEvent},
    lifecycle::{ConnectionClaim, ConnectionLocks, LifecycleError, LifecycleEvent, ProviderRegistry},
    traits::BankSyncDatabase,
};

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Connections whose consent runs out within this window are `ExpiringSoon`
    pub expiry_threshold: Duration,
    /// Access tokens are refreshed when they run out within this window
    pub access_margin: Duration,
    /// Consecutive failed syncs before the connection is flagged for attention
    pub failure_escalation: i64,
    /// Minimum time between two consent expiry warnings for the same connection
    pub warning_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiry_threshold: Duration::days(7),
            access_margin: Duration::minutes(5),
            failure_escalation: 3,
            warning_interval: Duration::days(7),
        }
    }
}

/// Owns every change of connection state.
///
/// All state-changing methods take a [`ConnectionClaim`] for the connection, so two syncs (or a sync and an
/// authorization callback) can never refresh the same connection at the same time.
pub struct LifecycleManager<B, P> {
    db: B,
    providers: ProviderRegistry<P>,
    config: LifecycleConfig,
    locks: ConnectionLocks,
    producers: EventProducers,
    retry: RetryPolicy,
}

impl<B: Clone, P> Clone for LifecycleManager<B, P> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            providers: self.providers.clone(),
            config: self.config.clone(),
            locks: self.locks.clone(),
            producers: self.producers.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<B, P> LifecycleManager<B, P>
where
    B: BankSyncDatabase,
    P: BankProvider,
{
    pub fn new(db: B, providers: ProviderRegistry<P>, config: LifecycleConfig, producers: EventProducers) -> Self {
        Self { db, providers, config, locks: ConnectionLocks::new(), producers, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn providers(&self) -> &ProviderRegistry<P> {
        &self.providers
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn producers(&self) -> &EventProducers {
        &self.producers
    }

    pub fn try_claim(&self, id: ConnectionId) -> Option<ConnectionClaim> {
        self.locks.try_claim(id)
    }

    pub async fn claim(&self, id: ConnectionId) -> ConnectionClaim {
        self.locks.claim(id).await
    }

    /// Fetches the connection. Call this after claiming it, so the state you act on is current.
    pub async fn fetch_connection(&self, claim: &ConnectionClaim) -> Result<BankConnection, LifecycleError> {
        let id = claim.connection_id();
        self.db.fetch_connection(id).await?.ok_or(LifecycleError::ConnectionNotFound(id))
    }

    /// Applies `event` to the connection and persists the new state.
    pub async fn transition(
        &self,
        claim: &ConnectionClaim,
        connection: &BankConnection,
        event: LifecycleEvent,
    ) -> Result<BankConnection, LifecycleError> {
        check_claim(claim, connection)?;
        let next = connection.state.apply(event)?;
        if next == connection.state {
            return Ok(connection.clone());
        }
        let updated = self.db.update_connection_state(connection.id, next).await?;
        info!("🔄️ Connection {} moved from {} to {next} ({event})", connection.id, connection.state);
        Ok(updated)
    }

    /// Makes sure the connection has a credential that can be used right now.
    ///
    /// Connections that are about to expire are moved to `ExpiringSoon` and refreshed. Connections whose consent has
    /// already run out, or whose refresh is rejected, end up in `ReauthorizationRequired`, and this method returns
    /// [`LifecycleError::NotUsable`].
    pub async fn ensure_usable(
        &self,
        claim: &ConnectionClaim,
        connection: BankConnection,
    ) -> Result<(BankConnection, Credential), LifecycleError> {
        check_claim(claim, &connection)?;
        if !connection.state.is_syncable() {
            return Err(LifecycleError::NotUsable { id: connection.id, state: connection.state });
        }
        let credential = self.db.fetch_credential(connection.id).await?;
        let now = Utc::now();
        if credential.consent_expired(now) {
            let reason = format!("Consent expired on {}", credential.consent_expires_at);
            let event = LifecycleEvent::IrrecoverableError;
            let connection = self.mark_reauthorization_required(claim, &connection, event, &reason).await?;
            return Err(LifecycleError::NotUsable { id: connection.id, state: connection.state });
        }
        let consent_expiring = credential.consent_remaining(now) < self.config.expiry_threshold;
        let access_expiring = credential.access_expiring(now, self.config.access_margin);
        if !(consent_expiring || access_expiring || connection.state == ConnectionState::Reauthorizing) {
            return Ok((connection, credential));
        }
        let connection = match connection.state {
            ConnectionState::Connected if consent_expiring => {
                self.transition(claim, &connection, LifecycleEvent::ExpiryApproaching).await?
            },
            _ => connection,
        };
        if consent_expiring {
            self.warn_consent_expiring(&connection, &credential).await?;
        }
        self.refresh(claim, connection, credential).await
    }

    /// Refreshes the credential with the provider.
    ///
    /// A rejected refresh moves the connection to `ReauthorizationRequired`. Any other failure hands back the current
    /// credential, which is still valid, and leaves the connection `ExpiringSoon` only if its consent is close to
    /// running out.
    pub async fn refresh(
        &self,
        claim: &ConnectionClaim,
        connection: BankConnection,
        credential: Credential,
    ) -> Result<(BankConnection, Credential), LifecycleError> {
        check_claim(claim, &connection)?;
        let provider = self.providers.get(connection.provider)?;
        let connection = match connection.state {
            ConnectionState::Reauthorizing => connection,
            _ => self.transition(claim, &connection, LifecycleEvent::RefreshStarted).await?,
        };
        debug!("🔄️ Refreshing credential for connection {}", connection.id);
        let result = self.retry.run("refresh credential", || provider.refresh_credential(&credential)).await;
        match result {
            Ok(refreshed) => {
                let still_expiring = refreshed.consent_remaining(Utc::now()) < self.config.expiry_threshold;
                let next = connection.state.apply(LifecycleEvent::RefreshSucceeded { still_expiring })?;
                let connection = self.db.store_credential(connection.id, &refreshed, next).await?;
                info!(
                    "🔄️ Credential for connection {} refreshed. Consent valid until {}",
                    connection.id, refreshed.consent_expires_at
                );
                Ok((connection, refreshed))
            },
            Err(e) if e.requires_reauthorization() => {
                warn!("🔄️ Provider rejected the refresh for connection {}: {e}", connection.id);
                let connection = self
                    .mark_reauthorization_required(claim, &connection, LifecycleEvent::RefreshRejected, &e.to_string())
                    .await?;
                Err(LifecycleError::NotUsable { id: connection.id, state: connection.state })
            },
            Err(e) => {
                warn!(
                    "🔄️ Could not refresh connection {} right now, carrying on with the current credential: {e}",
                    connection.id
                );
                let still_expiring = credential.consent_remaining(Utc::now()) < self.config.expiry_threshold;
                let event = LifecycleEvent::RefreshDeferred { still_expiring };
                let connection = self.transition(claim, &connection, event).await?;
                Ok((connection, credential))
            },
        }
    }

    /// Moves the connection to `ReauthorizationRequired`, counts the failure and tells the host.
    pub async fn mark_reauthorization_required(
        &self,
        claim: &ConnectionClaim,
        connection: &BankConnection,
        event: LifecycleEvent,
        reason: &str,
    ) -> Result<BankConnection, LifecycleError> {
        let updated = self.transition(claim, connection, event).await?;
        self.record_failure(&updated, reason).await?;
        let updated = self.db.fetch_connection(updated.id).await?.unwrap_or(updated);
        warn!("🔄️ Connection {} needs to be reauthorized by {}: {reason}", updated.id, updated.organizer);
        let event = ReauthorizationRequiredEvent { connection: updated.clone(), reason: reason.to_string() };
        self.producers.reauthorization_required(event).await;
        Ok(updated)
    }

    /// Counts a failed sync. Once the count reaches the escalation threshold the connection is flagged and the host
    /// is told, once per streak.
    pub async fn record_failure(&self, connection: &BankConnection, reason: &str) -> Result<i64, LifecycleError> {
        let failures = self.db.record_failure(connection.id, reason).await?;
        debug!("🔄️ Connection {} has failed {failures} time(s) in a row: {reason}", connection.id);
        if failures >= self.config.failure_escalation && !connection.needs_attention {
            self.db.set_needs_attention(connection.id, true).await?;
        }
        if failures == self.config.failure_escalation {
            warn!("🔄️ Connection {} has failed {failures} times in a row. Escalating.", connection.id);
            let event = SyncFailureEscalatedEvent {
                connection_id: connection.id,
                organizer: connection.organizer.clone(),
                consecutive_failures: failures,
                last_error: reason.to_string(),
            };
            self.producers.sync_failure_escalated(event).await;
        }
        Ok(failures)
    }

    pub async fn record_success(&self, connection: &BankConnection) -> Result<(), LifecycleError> {
        if connection.consecutive_failures > 0 || connection.needs_attention {
            self.db.reset_failures(connection.id).await?;
            debug!("🔄️ Failure count for connection {} reset", connection.id);
        }
        Ok(())
    }

    /// Disconnects the connection. The provider is asked to drop the grant, but a failure there does not stop the
    /// connection from being revoked locally.
    pub async fn disconnect(
        &self,
        claim: &ConnectionClaim,
        connection: &BankConnection,
    ) -> Result<BankConnection, LifecycleError> {
        check_claim(claim, connection)?;
        if connection.state.is_terminal() {
            return Ok(connection.clone());
        }
        // Fail early on an illegal transition, before bothering the provider
        connection.state.apply(LifecycleEvent::Disconnected)?;
        match self.db.fetch_credential(connection.id).await {
            Ok(credential) => {
                let provider = self.providers.get(connection.provider)?;
                if let Err(e) = self.retry.run("revoke grant", || provider.revoke(&credential)).await {
                    warn!("🔄️ Could not revoke the grant for connection {} at the provider: {e}", connection.id);
                }
            },
            Err(e) => {
                warn!("🔄️ No usable credential for connection {}, skipping provider revocation: {e}", connection.id)
            },
        }
        self.transition(claim, connection, LifecycleEvent::Disconnected).await
    }

    /// Stores a fresh grant from the redirect flow on an existing connection and brings it back to `Connected`.
    pub async fn reauthorized(
        &self,
        claim: &ConnectionClaim,
        connection: &BankConnection,
        credential: &Credential,
    ) -> Result<BankConnection, LifecycleError> {
        check_claim(claim, connection)?;
        let next = match connection.state {
            // A connection that is still usable simply gets the new grant
            ConnectionState::Connected | ConnectionState::Reauthorizing => ConnectionState::Connected,
            state => state.apply(LifecycleEvent::AuthorizationGranted)?,
        };
        let updated = self.db.store_credential(connection.id, credential, next).await?;
        self.db.reset_failures(connection.id).await?;
        info!("🔄️ Connection {} reauthorized. Consent valid until {}", connection.id, credential.consent_expires_at);
        Ok(updated)
    }

    async fn warn_consent_expiring(
        &self,
        connection: &BankConnection,
        credential: &Credential,
    ) -> Result<(), LifecycleError> {
        let now = Utc::now();
        let recently_warned =
            connection.expiry_warning_sent_at.map(|at| now - at < self.config.warning_interval).unwrap_or(false);
        if recently_warned {
            return Ok(());
        }
        self.db.mark_expiry_warning_sent(connection.id, now).await?;
        info!("🔄️ Consent for connection {} expires on {}", connection.id, credential.consent_expires_at);
        let event = ConsentExpiringEvent { connection: connection.clone(), expires_at: credential.consent_expires_at };
        self.producers.consent_expiring(event).await;
        Ok(())
    }
}

fn check_claim(claim: &ConnectionClaim, connection: &BankConnection) -> Result<(), LifecycleError> {
    if claim.connection_id() == connection.id {
        Ok(())
    } else {
        Err(LifecycleError::WrongClaim { held: claim.connection_id(), wanted: connection.id })
    }
}
