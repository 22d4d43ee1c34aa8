use bank_providers::{ProviderError, ProviderKind};
use thiserror::Error;

use crate::{
    db_types::{ConnectionId, ConnectionState},
    lifecycle::IllegalTransition,
    traits::BankSyncDatabaseError,
};

#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Database(#[from] BankSyncDatabaseError),
    #[error("{0}")]
    Transition(#[from] IllegalTransition),
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("No {0} provider is configured")]
    ProviderNotConfigured(ProviderKind),
    #[error("Connection {0} does not exist")]
    ConnectionNotFound(ConnectionId),
    #[error("Connection {id} cannot be used in state {state}")]
    NotUsable { id: ConnectionId, state: ConnectionState },
    #[error("The claim held is for connection {held}, not {wanted}")]
    WrongClaim { held: ConnectionId, wanted: ConnectionId },
}

impl LifecycleError {
    /// True if the connection has to go through the redirect flow again before anything else can happen.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(self, Self::NotUsable { state: ConnectionState::ReauthorizationRequired, .. })
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::NotUsable { state: ConnectionState::Revoked, .. })
    }
}
