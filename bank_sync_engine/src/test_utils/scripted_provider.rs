//! A [`BankProvider`] whose behaviour is scripted by the test.
//!
//! Transactions are served in pages per account. The cursor for page `n` is a continuation with key `page-n`; a
//! start or date cursor serves the first page again. Failures can be injected for listing accounts, for a given
//! page, for refreshes and for the next few fetches.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration as StdDuration,
};

use bank_providers::{
    AuthorizationGrant,
    AuthorizationRequest,
    AuthorizationStart,
    BankProvider,
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
use bank_sync_common::Secret;
use chrono::{Duration, NaiveDate, Utc};

const CURSOR_DATE: (i32, u32, u32) = (2024, 1, 1);

/// The cursor that points at page `n` of an account.
pub fn page_cursor(n: usize) -> PageCursor {
    let (y, m, d) = CURSOR_DATE;
    PageCursor::Continuation { date_from: NaiveDate::from_ymd_opt(y, m, d).unwrap(), key: format!("page-{n}") }
}

#[derive(Default)]
struct Script {
    accounts: Vec<ExternalAccount>,
    pages: HashMap<String, Vec<Vec<RawTransaction>>>,
    list_accounts_error: Option<ProviderError>,
    page_errors: HashMap<(String, usize), ProviderError>,
    unauthorized_fetches: u32,
    refresh_error: Option<ProviderError>,
    deny_authorization: bool,
    consent_days: i64,
    delay: Option<StdDuration>,
    refresh_calls: u32,
    revoke_calls: u32,
    requested_pages: Vec<(String, usize)>,
}

#[derive(Clone)]
pub struct ScriptedProvider {
    kind: ProviderKind,
    signer: StateSigner,
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        let secret = Secret::new(b"scripted provider state secret".to_vec());
        let signer = StateSigner::new(&secret, Duration::minutes(30)).unwrap();
        let script = Script { consent_days: 90, ..Default::default() };
        Self { kind, signer, script: Arc::new(Mutex::new(script)) }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Adds an account with the given pages of transactions.
    pub fn with_account(&self, account_id: &str, currency: &str, pages: Vec<Vec<RawTransaction>>) -> &Self {
        let mut script = self.script();
        script.accounts.push(ExternalAccount {
            external_id: account_id.to_string(),
            iban: Some(format!("DE000000000{account_id}")),
            currency: currency.parse().ok(),
            display_name: Some(format!("Account {account_id}")),
            owner_name: Some("Ticket Shop".to_string()),
        });
        script.pages.insert(account_id.to_string(), pages);
        self
    }

    /// Replaces the pages of an existing account.
    pub fn set_pages(&self, account_id: &str, pages: Vec<Vec<RawTransaction>>) {
        self.script().pages.insert(account_id.to_string(), pages);
    }

    pub fn fail_list_accounts(&self, error: Option<ProviderError>) {
        self.script().list_accounts_error = error;
    }

    /// Every fetch of page `page` of the account fails with `error` until cleared.
    pub fn fail_page(&self, account_id: &str, page: usize, error: ProviderError) {
        self.script().page_errors.insert((account_id.to_string(), page), error);
    }

    pub fn clear_page_failures(&self) {
        self.script().page_errors.clear();
    }

    /// The next `n` transaction fetches fail with `Unauthorized`.
    pub fn reject_next_fetches(&self, n: u32) {
        self.script().unauthorized_fetches = n;
    }

    pub fn fail_refresh(&self, error: Option<ProviderError>) {
        self.script().refresh_error = error;
    }

    pub fn deny_authorization(&self, deny: bool) {
        self.script().deny_authorization = deny;
    }

    /// Consent lifetime handed out by authorizations and refreshes.
    pub fn set_consent_days(&self, days: i64) {
        self.script().consent_days = days;
    }

    /// Every transaction fetch and code exchange sleeps this long first.
    pub fn set_delay(&self, delay: Option<StdDuration>) {
        self.script().delay = delay;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.script().refresh_calls
    }

    pub fn revoke_calls(&self) -> u32 {
        self.script().revoke_calls
    }

    /// Every page that was asked for, in order.
    pub fn requested_pages(&self) -> Vec<(String, usize)> {
        self.script().requested_pages.clone()
    }

    pub fn credential(&self, consent_days: i64) -> Credential {
        let reference = format!("grant-{}", rand::random::<u32>());
        let mut credential = Credential::new(self.kind, reference, Utc::now() + Duration::days(consent_days));
        credential.access_token = Some(Secret::new(format!("access-{}", rand::random::<u32>())));
        credential.access_expires_at = Some(Utc::now() + Duration::hours(24));
        credential
    }
}

fn page_index(cursor: &PageCursor) -> usize {
    match cursor {
        PageCursor::Continuation { key, .. } => key.strip_prefix("page-").and_then(|n| n.parse().ok()).unwrap_or(0),
        PageCursor::Start | PageCursor::Date { .. } => 0,
    }
}

impl BankProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn build_authorization_url(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationStart, ProviderError> {
        let state = self.signer.sign(&StateClaims::from_request(request, self.kind));
        let provider_reference = match self.kind {
            ProviderKind::GoCardless => Some(format!("requisition-{}", request.nonce)),
            _ => None,
        };
        let url = format!("https://bank.example.com/authorize?state={state}");
        Ok(AuthorizationStart { url, state, provider_reference })
    }

    async fn exchange_authorization(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ProviderError> {
        let claims = self.signer.verify(state, self.kind, Utc::now())?;
        let delay = self.script().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let consent_days = {
            let script = self.script();
            if script.deny_authorization {
                return Err(ProviderError::AuthorizationDenied(format!("Code {code} was not authorized")));
            }
            script.consent_days
        };
        let mut credential = self.credential(consent_days);
        credential.reference = format!("grant-{code}");
        Ok(AuthorizationGrant { claims, credential })
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, ProviderError> {
        let consent_days = {
            let mut script = self.script();
            script.refresh_calls += 1;
            if let Some(e) = script.refresh_error.clone() {
                return Err(e);
            }
            script.consent_days
        };
        let mut refreshed = self.credential(consent_days);
        refreshed.reference = credential.reference.clone();
        Ok(refreshed)
    }

    async fn list_accounts(&self, _credential: &Credential) -> Result<Vec<ExternalAccount>, ProviderError> {
        let script = self.script();
        match &script.list_accounts_error {
            Some(e) => Err(e.clone()),
            None => Ok(script.accounts.clone()),
        }
    }

    async fn fetch_transactions(
        &self,
        _credential: &Credential,
        account_id: &str,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError> {
        let delay = self.script().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script();
        if script.unauthorized_fetches > 0 {
            script.unauthorized_fetches -= 1;
            return Err(ProviderError::Unauthorized("Access token rejected".into()));
        }
        let index = page_index(cursor);
        script.requested_pages.push((account_id.to_string(), index));
        if let Some(e) = script.page_errors.get(&(account_id.to_string(), index)) {
            return Err(e.clone());
        }
        let pages = script
            .pages
            .get(account_id)
            .ok_or_else(|| ProviderError::AccountUnavailable(format!("Unknown account {account_id}")))?;
        let transactions = pages.get(index).cloned().unwrap_or_default();
        let has_more = index + 1 < pages.len();
        let next_cursor =
            if has_more { page_cursor(index + 1) } else { PageCursor::Date { from: Utc::now().date_naive() } };
        Ok(TransactionPage { transactions, next_cursor, has_more })
    }

    async fn revoke(&self, _credential: &Credential) -> Result<(), ProviderError> {
        self.script().revoke_calls += 1;
        Ok(())
    }
}
