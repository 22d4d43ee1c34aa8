use std::fmt::Display;

use bank_providers::ProviderKind;
use bank_sync_engine::db_types::{ConnectionQueryFilter, TransactionQueryFilter, TransactionState};
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// Body of `POST /api/authorizations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationParams {
    pub organizer: String,
    pub provider: ProviderKind,
    pub institution_id: String,
    pub redirect_uri: String,
}

/// Body of `POST /api/connections/{id}/reauthorize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReauthorizeParams {
    pub redirect_uri: String,
}

/// What the bank appends to the redirect URI. GoCardless only sends back the reference we gave it; Enable Banking
/// sends a code, or an error if the account holder gave up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(alias = "ref")]
    pub state: String,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionQuery {
    pub organizer: Option<String>,
    #[serde(default)]
    pub include_revoked: bool,
}

impl From<ConnectionQuery> for ConnectionQueryFilter {
    fn from(query: ConnectionQuery) -> Self {
        let filter = ConnectionQueryFilter { organizer: query.organizer, ..Default::default() };
        if query.include_revoked {
            filter.with_revoked()
        } else {
            filter
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub organizer: Option<String>,
    pub connection_id: Option<i64>,
    /// Comma-separated transaction states
    pub state: Option<String>,
    pub limit: Option<i64>,
}

impl TryFrom<TransactionQuery> for TransactionQueryFilter {
    type Error = ServerError;

    fn try_from(query: TransactionQuery) -> Result<Self, Self::Error> {
        let mut filter = TransactionQueryFilter::default();
        if let Some(organizer) = query.organizer {
            filter = filter.with_organizer(organizer);
        }
        if let Some(id) = query.connection_id {
            filter = filter.with_connection(id.into());
        }
        if let Some(limit) = query.limit {
            filter = filter.with_limit(limit);
        }
        for state in query.state.iter().flat_map(|s| s.split(',')).map(str::trim).filter(|s| !s.is_empty()) {
            let state = state
                .parse::<TransactionState>()
                .map_err(|e| ServerError::InvalidRequestPath(format!("Unknown transaction state {state}. {e}")))?;
            filter = filter.with_state(state);
        }
        Ok(filter)
    }
}

/// Body of `POST /api/transactions/{id}/approve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveParams {
    pub orders: Vec<String>,
}

/// Body of `POST /api/transactions/{id}/discard`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscardParams {
    pub reason: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_query_states() {
        let query = TransactionQuery {
            organizer: Some("acme".into()),
            state: Some("Ambiguous, NeedsReview".into()),
            ..Default::default()
        };
        let filter = TransactionQueryFilter::try_from(query).unwrap();
        assert_eq!(filter.organizer.as_deref(), Some("acme"));
        assert_eq!(filter.states, vec![TransactionState::Ambiguous, TransactionState::NeedsReview]);
        let query = TransactionQuery { state: Some("Bogus".into()), ..Default::default() };
        assert!(TransactionQueryFilter::try_from(query).is_err());
    }
}
