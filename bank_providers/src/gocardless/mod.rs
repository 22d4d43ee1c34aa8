//! GoCardless Bank Account Data (formerly Nordigen).
//!
//! The redirect flow creates an end-user agreement and a requisition whose `reference` is our signed state token.
//! GoCardless sends the account holder back with `?ref=<reference>`; the requisition id we got up front is the
//! "code" for [`BankProvider::exchange_authorization`].
//!
//! Application tokens are short-lived and are stored in the credential alongside the requisition id.
mod config;
mod types;

use std::sync::Arc;

use bank_sync_common::{CurrencyCode, MinorUnits, Secret};
use chrono::{DateTime, Duration, NaiveDate, Utc};
pub use config::{GoCardlessConfig, GOCARDLESS_BASE_URL};
use log::*;
use reqwest::{Client, Method, RequestBuilder};
use sha2::{Digest, Sha256};

use crate::{
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
pub struct GoCardlessProvider {
    config: GoCardlessConfig,
    client: Arc<Client>,
    signer: StateSigner,
}

impl GoCardlessProvider {
    pub fn new(config: GoCardlessConfig, signer: StateSigner) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client), signer })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, method: Method, path: &str, token: &Secret<String>) -> RequestBuilder {
        self.client.request(method, self.url(path)).bearer_auth(token.reveal())
    }

    async fn new_token(&self) -> Result<types::TokenPair, ProviderError> {
        let body = types::NewTokenRequest {
            secret_id: self.config.secret_id.reveal(),
            secret_key: self.config.secret_key.reveal(),
        };
        trace!("🏦️ Requesting a new GoCardless access token");
        send_json(self.client.post(self.url("/token/new/")).json(&body)).await
    }

    async fn refresh_access(&self, refresh: &Secret<String>) -> Result<types::AccessToken, ProviderError> {
        let body = types::RefreshTokenRequest { refresh: refresh.reveal() };
        send_json(self.client.post(self.url("/token/refresh/")).json(&body)).await
    }

    async fn requisition(&self, token: &Secret<String>, id: &str) -> Result<types::Requisition, ProviderError> {
        let path = format!("/requisitions/{id}/");
        send_json(self.request(Method::GET, &path, token)).await
    }

    /// Consent runs from the moment the account holder accepted the agreement.
    async fn consent_expiry(
        &self,
        token: &Secret<String>,
        agreement_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ProviderError> {
        let fallback = now + Duration::days(self.config.access_valid_for_days);
        let Some(agreement_id) = agreement_id else {
            return Ok(fallback);
        };
        let path = format!("/agreements/enduser/{agreement_id}/");
        let agreement = send_json::<types::Agreement>(self.request(Method::GET, &path, token)).await?;
        trace!("🏦️ Agreement {} accepted at {:?}", agreement.id, agreement.accepted);
        let start = agreement.accepted.or(agreement.created).unwrap_or(now);
        let days = agreement.access_valid_for_days.unwrap_or(self.config.access_valid_for_days);
        Ok(start + Duration::days(days))
    }

    fn credential_from_tokens(
        &self,
        requisition_id: String,
        tokens: types::TokenPair,
        consent_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Credential {
        Credential {
            provider: ProviderKind::GoCardless,
            reference: requisition_id,
            access_token: Some(Secret::new(tokens.access)),
            refresh_token: Some(Secret::new(tokens.refresh)),
            access_expires_at: Some(now + Duration::seconds(tokens.access_expires)),
            refresh_expires_at: Some(now + Duration::seconds(tokens.refresh_expires)),
            consent_expires_at,
        }
    }

    /// A usable access token: the stored one if still valid, else refreshed, else brand new.
    async fn renew_tokens(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Credential, ProviderError> {
        let mut renewed = credential.clone();
        let refresh_valid = renewed.refresh_expires_at.map(|t| t > now).unwrap_or(false);
        if let (Some(refresh), true) = (&credential.refresh_token, refresh_valid) {
            match self.refresh_access(refresh).await {
                Ok(token) => {
                    debug!("🏦️ Refreshed GoCardless access token for requisition {}", credential.reference);
                    renewed.access_token = Some(Secret::new(token.access));
                    renewed.access_expires_at = Some(now + Duration::seconds(token.access_expires));
                    return Ok(renewed);
                },
                Err(ProviderError::Unauthorized(_)) => {
                    debug!("🏦️ GoCardless refresh token was rejected. Requesting a new token pair.");
                },
                Err(e) => return Err(e),
            }
        }
        let tokens = self.new_token().await.map_err(|e| match e {
            ProviderError::Unauthorized(m) => ProviderError::RefreshRejected(format!("Application token refused: {m}")),
            e => e,
        })?;
        Ok(self.credential_from_tokens(credential.reference.clone(), tokens, credential.consent_expires_at, now))
    }

    fn token(credential: &Credential) -> Result<&Secret<String>, ProviderError> {
        credential
            .access_token
            .as_ref()
            .ok_or_else(|| ProviderError::Unauthorized("Credential carries no access token".to_string()))
    }

    fn normalize(&self, tx: types::Transaction, account_id: &str, status: BookingStatus) -> Option<RawTransaction> {
        let currency = match tx.transaction_amount.currency.parse::<CurrencyCode>() {
            Ok(c) => c,
            Err(e) => {
                warn!("🏦️ Skipping transaction on account {account_id}: {e}");
                return None;
            },
        };
        let amount = match MinorUnits::from_decimal_str(&tx.transaction_amount.amount, &currency) {
            Ok(a) => a,
            Err(e) => {
                warn!("🏦️ Skipping transaction on account {account_id}: {e}");
                return None;
            },
        };
        let remittance = tx.remittance();
        let payer_name = if amount.is_negative() { tx.creditor_name.clone() } else { tx.debtor_name.clone() };
        let external_id = tx
            .transaction_id
            .clone()
            .or_else(|| tx.internal_transaction_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                let date = tx.booking_date.or(tx.value_date).map(|d| d.to_string()).unwrap_or_default();
                let payer = payer_name.clone().unwrap_or_default();
                transaction_checksum(&[account_id, &amount.to_string(), currency.as_str(), &date, &remittance, &payer])
            });
        Some(RawTransaction {
            external_id,
            account_id: account_id.to_string(),
            amount,
            currency,
            value_date: tx.value_date,
            booking_date: tx.booking_date,
            payer_name,
            payer_iban: tx.debtor_account.and_then(|a| a.iban),
            remittance,
            booking_status: status,
        })
    }
}

impl BankProvider for GoCardlessProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoCardless
    }

    async fn build_authorization_url(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationStart, ProviderError> {
        let state = self.signer.sign(&StateClaims::from_request(request, ProviderKind::GoCardless));
        let token = Secret::new(self.new_token().await?.access);
        let agreement = types::NewAgreement {
            institution_id: &request.institution_id,
            max_historical_days: self.config.max_historical_days,
            access_valid_for_days: self.config.access_valid_for_days,
            access_scope: ["balances", "details", "transactions"],
        };
        let agreement: types::Agreement =
            send_json(self.request(Method::POST, "/agreements/enduser/", &token).json(&agreement)).await?;
        let requisition = types::NewRequisition {
            redirect: &request.redirect_uri,
            institution_id: &request.institution_id,
            reference: &state,
            agreement: &agreement.id,
            user_language: self.config.user_language.as_deref(),
        };
        let requisition: types::Requisition =
            send_json(self.request(Method::POST, "/requisitions/", &token).json(&requisition)).await?;
        let url = requisition
            .link
            .ok_or_else(|| ProviderError::InvalidData("Requisition has no authorization link".to_string()))?;
        info!(
            "🏦️ Created GoCardless requisition {} for organizer {} at {}",
            requisition.id, request.organizer, request.institution_id
        );
        Ok(AuthorizationStart { url, state, provider_reference: Some(requisition.id) })
    }

    async fn exchange_authorization(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ProviderError> {
        let now = Utc::now();
        let claims = self.signer.verify(state, ProviderKind::GoCardless, now)?;
        let tokens = self.new_token().await?;
        let token = Secret::new(tokens.access.clone());
        let requisition = self.requisition(&token, code).await.map_err(|e| match e {
            ProviderError::QueryError { status: 404, .. } => {
                ProviderError::InvalidState(format!("Requisition {code} does not exist"))
            },
            e => e,
        })?;
        if requisition.reference.as_deref() != Some(state) {
            return Err(ProviderError::InvalidState(format!("Requisition {code} was not created for this state")));
        }
        if !requisition.is_linked() {
            return Err(ProviderError::AuthorizationDenied(format!(
                "Requisition {code} has status {}",
                requisition.status
            )));
        }
        let consent_expires_at = self.consent_expiry(&token, requisition.agreement.as_deref(), now).await?;
        let credential = self.credential_from_tokens(requisition.id, tokens, consent_expires_at, now);
        info!("🏦️ GoCardless requisition {code} linked for organizer {}", claims.organizer);
        Ok(AuthorizationGrant { claims, credential })
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, ProviderError> {
        let now = Utc::now();
        let mut renewed = self.renew_tokens(credential, now).await?;
        let token = Self::token(&renewed)?.clone();
        let requisition = self.requisition(&token, &credential.reference).await.map_err(|e| match e {
            ProviderError::QueryError { status: 404, .. } => {
                ProviderError::RefreshRejected(format!("Requisition {} no longer exists", credential.reference))
            },
            e => e,
        })?;
        if !requisition.is_linked() {
            return Err(ProviderError::RefreshRejected(format!(
                "Requisition {} has status {}",
                credential.reference, requisition.status
            )));
        }
        renewed.consent_expires_at = self.consent_expiry(&token, requisition.agreement.as_deref(), now).await?;
        Ok(renewed)
    }

    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<ExternalAccount>, ProviderError> {
        let token = Self::token(credential)?;
        let requisition = self.requisition(token, &credential.reference).await?;
        let mut accounts = Vec::with_capacity(requisition.accounts.len());
        for id in requisition.accounts {
            let path = format!("/accounts/{id}/details/");
            let details = send_json::<types::AccountDetailsResponse>(self.request(Method::GET, &path, token))
                .await
                .map_err(account_unavailable(&id))?
                .account;
            let currency = details.currency.as_deref().and_then(|c| c.parse::<CurrencyCode>().ok());
            accounts.push(ExternalAccount {
                external_id: id,
                iban: details.iban,
                currency,
                display_name: details.display_name.or(details.name),
                owner_name: details.owner_name,
            });
        }
        debug!("🏦️ Requisition {} exposes {} account(s)", credential.reference, accounts.len());
        Ok(accounts)
    }

    async fn fetch_transactions(
        &self,
        credential: &Credential,
        account_id: &str,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError> {
        let token = Self::token(credential)?;
        let today = Utc::now().date_naive();
        let from = match cursor {
            PageCursor::Start => today - Duration::days(self.config.max_historical_days),
            PageCursor::Date { from } => *from,
            PageCursor::Continuation { date_from, .. } => *date_from,
        };
        let window = date_window(from, today, self.config.page_window_days, self.config.overlap_days);
        let path = format!("/accounts/{account_id}/transactions/");
        let date_from = window.from.to_string();
        let date_to = window.to.to_string();
        let request = self.request(Method::GET, &path, token).query(&[("date_from", &date_from), ("date_to", &date_to)]);
        let response =
            send_json::<types::TransactionsResponse>(request).await.map_err(account_unavailable(account_id))?;
        let types::BookedAndPending { booked, pending } = response.transactions;
        let mut transactions = Vec::with_capacity(booked.len() + pending.len());
        transactions.extend(booked.into_iter().filter_map(|t| self.normalize(t, account_id, BookingStatus::Booked)));
        transactions.extend(pending.into_iter().filter_map(|t| self.normalize(t, account_id, BookingStatus::Pending)));
        trace!(
            "🏦️ Fetched {} transaction(s) for account {account_id} between {date_from} and {date_to}",
            transactions.len()
        );
        Ok(TransactionPage { transactions, next_cursor: window.next_cursor, has_more: window.has_more })
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), ProviderError> {
        let renewed = self.renew_tokens(credential, Utc::now()).await?;
        let token = Self::token(&renewed)?;
        let path = format!("/requisitions/{}/", credential.reference);
        send_empty(self.request(Method::DELETE, &path, token)).await?;
        info!("🏦️ Deleted GoCardless requisition {}", credential.reference);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub has_more: bool,
    pub next_cursor: PageCursor,
}

/// Splits `[from, today]` into pages of `window_days`. Once the window reaches today the next cursor steps back
/// `overlap_days` (but never before `from`), so late bookings are picked up by the next sync.
pub(crate) fn date_window(from: NaiveDate, today: NaiveDate, window_days: i64, overlap_days: i64) -> DateWindow {
    let from = from.min(today);
    let to = (from + Duration::days(window_days.max(1) - 1)).min(today);
    let has_more = to < today;
    let next_from = if has_more { to + Duration::days(1) } else { (to - Duration::days(overlap_days)).max(from) };
    DateWindow { from, to, has_more, next_cursor: PageCursor::Date { from: next_from } }
}

/// Some banks omit transaction ids. Hash the stable fields instead.
fn transaction_checksum(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(b"|");
    }
    let digest = base64::encode_config(hasher.finalize(), base64::URL_SAFE_NO_PAD);
    format!("chk-{}", &digest[..32])
}
