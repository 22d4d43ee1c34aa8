//! Enable Banking.
//!
//! The state token is passed straight through `POST /auth` and comes back on the callback together with a `code`,
//! which `POST /sessions` exchanges for a session. The session id is the credential reference; requests are signed
//! with an application JWT, so there are no access or refresh tokens to store.
mod config;
mod jwt;
mod types;

use std::sync::Arc;

use bank_sync_common::{CurrencyCode, MinorUnits};
use chrono::{Duration, Utc};
pub use config::{EnableBankingConfig, ENABLE_BANKING_BASE_URL};
use log::*;
use reqwest::{Client, Method, RequestBuilder};

use crate::{
    enable_banking::jwt::RequestSigner,
    rest::{account_unavailable, send_empty, send_json},
    AuthorizationGrant,
    AuthorizationRequest,
    AuthorizationStart,
    BankProvider,
    BookingStatus,
    Credential,
    ExternalAccount,
    PageCursor,
    ProviderError,
    ProviderKind,
    RawTransaction,
    StateClaims,
    StateSigner,
    TransactionPage,
};

#[derive(Clone)]
pub struct EnableBankingProvider {
    config: EnableBankingConfig,
    client: Arc<Client>,
    signer: StateSigner,
    request_signer: RequestSigner,
}

impl EnableBankingProvider {
    pub fn new(config: EnableBankingConfig, signer: StateSigner) -> Result<Self, ProviderError> {
        let request_signer = RequestSigner::new(&config.application_id, config.private_key.reveal())?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client), signer, request_signer })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let jwt = self.request_signer.token(Utc::now())?;
        Ok(self.client.request(method, self.url(path)).bearer_auth(jwt))
    }

    async fn session(&self, session_id: &str) -> Result<types::Session, ProviderError> {
        let path = format!("/sessions/{session_id}");
        send_json(self.request(Method::GET, &path)?).await
    }

    fn normalize(tx: types::Transaction, account_id: &str) -> Option<RawTransaction> {
        let currency = match tx.transaction_amount.currency.parse::<CurrencyCode>() {
            Ok(c) => c,
            Err(e) => {
                warn!("🏦️ Skipping transaction on account {account_id}: {e}");
                return None;
            },
        };
        let amount = match MinorUnits::from_decimal_str(&tx.transaction_amount.amount, &currency) {
            // Amounts are unsigned, the direction is in the indicator
            Ok(a) if tx.credit_debit_indicator == "DBIT" => -a.abs(),
            Ok(a) => a.abs(),
            Err(e) => {
                warn!("🏦️ Skipping transaction on account {account_id}: {e}");
                return None;
            },
        };
        let Some(external_id) = tx.transaction_id.or(tx.entry_reference).filter(|id| !id.is_empty()) else {
            warn!("🏦️ Skipping transaction without an id on account {account_id}");
            return None;
        };
        let booking_status = match tx.status.as_deref() {
            Some("BOOK") | None => BookingStatus::Booked,
            Some(_) => BookingStatus::Pending,
        };
        let payer = if amount.is_negative() { tx.creditor } else { tx.debtor };
        let remittance = tx
            .remittance_information
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<&str>>()
            .join(" ");
        Some(RawTransaction {
            external_id,
            account_id: account_id.to_string(),
            amount,
            currency,
            value_date: tx.value_date,
            booking_date: tx.booking_date,
            payer_name: payer.and_then(|p| p.name),
            payer_iban: tx.debtor_account.and_then(|a| a.iban),
            remittance,
            booking_status,
        })
    }
}

/// Enable Banking identifies banks by name and country. We encode both in the institution id as `CC:Name`.
fn split_institution(institution_id: &str) -> Result<(&str, &str), ProviderError> {
    match institution_id.split_once(':') {
        Some((country, name)) if country.len() == 2 && !name.is_empty() => Ok((country, name)),
        _ => Err(ProviderError::QueryError {
            status: 400,
            message: format!("Institution id must look like 'FI:Nordea', got '{institution_id}'"),
        }),
    }
}

impl BankProvider for EnableBankingProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EnableBanking
    }

    async fn build_authorization_url(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationStart, ProviderError> {
        let (country, name) = split_institution(&request.institution_id)?;
        let state = self.signer.sign(&StateClaims::from_request(request, ProviderKind::EnableBanking));
        let body = types::StartAuthorization {
            access: types::Access {
                valid_until: request.issued_at + Duration::days(self.config.session_validity_days),
            },
            aspsp: types::Aspsp { name, country },
            state: &state,
            redirect_url: &request.redirect_uri,
            psu_type: &self.config.psu_type,
        };
        let response: types::StartAuthorizationResponse =
            send_json(self.request(Method::POST, "/auth")?.json(&body)).await?;
        info!("🏦️ Started Enable Banking authorization for organizer {} at {name} ({country})", request.organizer);
        Ok(AuthorizationStart { url: response.url, state, provider_reference: response.authorization_id })
    }

    async fn exchange_authorization(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ProviderError> {
        let claims = self.signer.verify(state, ProviderKind::EnableBanking, Utc::now())?;
        let body = types::CreateSession { code };
        let session: types::CreateSessionResponse =
            send_json(self.request(Method::POST, "/sessions")?.json(&body)).await.map_err(|e| match e {
                ProviderError::QueryError { status, message } if status == 400 || status == 422 => {
                    ProviderError::AuthorizationDenied(message)
                },
                e => e,
            })?;
        let credential = Credential::new(ProviderKind::EnableBanking, session.session_id, session.access.valid_until);
        info!("🏦️ Enable Banking session {} created for organizer {}", credential.reference, claims.organizer);
        Ok(AuthorizationGrant { claims, credential })
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, ProviderError> {
        let session = self.session(&credential.reference).await.map_err(|e| match e {
            ProviderError::QueryError { status: 404, .. } => {
                ProviderError::RefreshRejected(format!("Session {} no longer exists", credential.reference))
            },
            e => e,
        })?;
        if !session.is_authorized() {
            return Err(ProviderError::RefreshRejected(format!(
                "Session {} has status {}",
                credential.reference, session.status
            )));
        }
        let mut renewed = credential.clone();
        if let Some(access) = session.access {
            renewed.consent_expires_at = access.valid_until;
        }
        Ok(renewed)
    }

    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<ExternalAccount>, ProviderError> {
        let session = self.session(&credential.reference).await?;
        let mut accounts = Vec::with_capacity(session.accounts.len());
        for uid in session.accounts {
            let path = format!("/accounts/{uid}/details");
            let details = send_json::<types::AccountDetails>(self.request(Method::GET, &path)?)
                .await
                .map_err(account_unavailable(&uid))?;
            let currency = details.currency.as_deref().and_then(|c| c.parse::<CurrencyCode>().ok());
            accounts.push(ExternalAccount {
                external_id: uid,
                iban: details.account_id.and_then(|a| a.iban),
                currency,
                display_name: details.name.or(details.product),
                owner_name: None,
            });
        }
        debug!("🏦️ Session {} exposes {} account(s)", credential.reference, accounts.len());
        Ok(accounts)
    }

    async fn fetch_transactions(
        &self,
        _credential: &Credential,
        account_id: &str,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError> {
        let today = Utc::now().date_naive();
        let (date_from, key) = match cursor {
            PageCursor::Start => (today - Duration::days(self.config.max_historical_days), None),
            PageCursor::Date { from } => (*from, None),
            PageCursor::Continuation { date_from, key } => (*date_from, Some(key.as_str())),
        };
        let date_from = date_from.min(today);
        let path = format!("/accounts/{account_id}/transactions");
        let date_from_param = date_from.to_string();
        let mut params = vec![("date_from", date_from_param.as_str())];
        if let Some(key) = key {
            params.push(("continuation_key", key));
        }
        let request = self.request(Method::GET, &path)?.query(&params);
        let response =
            send_json::<types::TransactionsResponse>(request).await.map_err(account_unavailable(account_id))?;
        let transactions =
            response.transactions.into_iter().filter_map(|t| Self::normalize(t, account_id)).collect::<Vec<_>>();
        let (next_cursor, has_more) = match response.continuation_key.filter(|k| !k.is_empty()) {
            Some(key) => (PageCursor::Continuation { date_from, key }, true),
            None => {
                let from = (today - Duration::days(self.config.overlap_days)).max(date_from);
                (PageCursor::Date { from }, false)
            },
        };
        trace!("🏦️ Fetched {} transaction(s) for account {account_id} (more: {has_more})", transactions.len());
        Ok(TransactionPage { transactions, next_cursor, has_more })
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), ProviderError> {
        let path = format!("/sessions/{}", credential.reference);
        send_empty(self.request(Method::DELETE, &path)?).await?;
        info!("🏦️ Closed Enable Banking session {}", credential.reference);
        Ok(())
    }
}
