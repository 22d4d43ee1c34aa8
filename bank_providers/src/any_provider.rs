use crate::{
    AuthorizationGrant,
    AuthorizationRequest,
    AuthorizationStart,
    BankProvider,
    Credential,
    EnableBankingProvider,
    ExternalAccount,
    GoCardlessProvider,
    PageCursor,
    ProviderError,
    ProviderKind,
    TransactionPage,
};

/// Static dispatch over the supported providers, so a single registry can hold all of them.
#[derive(Clone)]
pub enum AnyProvider {
    GoCardless(GoCardlessProvider),
    EnableBanking(EnableBankingProvider),
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $call:expr) => {
        match $self {
            AnyProvider::GoCardless($p) => $call,
            AnyProvider::EnableBanking($p) => $call,
        }
    };
}

impl From<GoCardlessProvider> for AnyProvider {
    fn from(p: GoCardlessProvider) -> Self {
        Self::GoCardless(p)
    }
}

impl From<EnableBankingProvider> for AnyProvider {
    fn from(p: EnableBankingProvider) -> Self {
        Self::EnableBanking(p)
    }
}

impl BankProvider for AnyProvider {
    fn kind(&self) -> ProviderKind {
        dispatch!(self, p => p.kind())
    }

    async fn build_authorization_url(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationStart, ProviderError> {
        dispatch!(self, p => p.build_authorization_url(request).await)
    }

    async fn exchange_authorization(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ProviderError> {
        dispatch!(self, p => p.exchange_authorization(code, state).await)
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, ProviderError> {
        dispatch!(self, p => p.refresh_credential(credential).await)
    }

    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<ExternalAccount>, ProviderError> {
        dispatch!(self, p => p.list_accounts(credential).await)
    }

    async fn fetch_transactions(
        &self,
        credential: &Credential,
        account_id: &str,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError> {
        dispatch!(self, p => p.fetch_transactions(credential, account_id, cursor).await)
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), ProviderError> {
        dispatch!(self, p => p.revoke(credential).await)
    }
}
