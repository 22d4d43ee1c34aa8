use crate::{
    AuthorizationGrant,
    AuthorizationRequest,
    AuthorizationStart,
    Credential,
    ExternalAccount,
    PageCursor,
    ProviderError,
    ProviderKind,
    TransactionPage,
};

/// The interface every bank data aggregator is normalized into.
///
/// Implementations never retry on their own. Callers wrap calls in a [`crate::RetryPolicy`], which only retries
/// [`ProviderError::Transient`] failures.
#[allow(async_fn_in_trait)]
pub trait BankProvider {
    fn kind(&self) -> ProviderKind;

    /// Starts the redirect flow for the given request. The returned state token is signed and binds the flow to the
    /// organizer and institution in the request. Nothing is stored locally until the callback arrives.
    async fn build_authorization_url(&self, request: &AuthorizationRequest)
        -> Result<AuthorizationStart, ProviderError>;

    /// Completes the redirect flow. `code` is whatever the provider handed back on the callback (an authorization
    /// code, or the requisition id for GoCardless). Fails with [`ProviderError::InvalidState`] if the state token is
    /// tampered with, stale, or was issued for another provider.
    async fn exchange_authorization(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ProviderError>;

    /// Re-validates the grant with the provider and returns fresh credential material.
    ///
    /// Fails with [`ProviderError::RefreshRejected`] when the provider reports the grant as revoked, expired or
    /// suspended.
    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, ProviderError>;

    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<ExternalAccount>, ProviderError>;

    /// Fetches one page of transactions for the account, starting at `cursor`.
    async fn fetch_transactions(
        &self,
        credential: &Credential,
        account_id: &str,
        cursor: &PageCursor,
    ) -> Result<TransactionPage, ProviderError>;

    /// Asks the provider to drop the grant. Callers treat failures here as non-fatal.
    async fn revoke(&self, credential: &Credential) -> Result<(), ProviderError>;
}
