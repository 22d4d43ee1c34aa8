use log::*;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::ProviderError;

/// Sends the request and deserializes a successful JSON response. Failures are mapped onto the provider error
/// taxonomy so that no status codes leak out of the adapters.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = send(request).await?;
    response.json::<T>().await.map_err(|e| ProviderError::JsonError(e.to_string()))
}

/// Like [`send_json`], for endpoints whose response body we don't need.
pub(crate) async fn send_empty(request: RequestBuilder) -> Result<(), ProviderError> {
    let _ = send(request).await?;
    Ok(())
}

async fn send(request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        trace!("🌐️ Provider request successful. {status}");
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let message = response.text().await.unwrap_or_default();
    debug!("🌐️ Provider request to {url} failed. {status}: {message}");
    Err(classify(status, message))
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::JsonError(e.to_string())
    } else {
        // Timeouts, refused connections, DNS and TLS failures are all worth another try
        ProviderError::Transient(e.to_string())
    }
}

pub(crate) fn classify(status: StatusCode, message: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(format!("{s}: {message}")),
        s => ProviderError::QueryError { status: s.as_u16(), message },
    }
}

/// 404s on account paths mean the bank no longer exposes the account.
pub(crate) fn account_unavailable(account_id: &str) -> impl FnOnce(ProviderError) -> ProviderError + '_ {
    move |e| match e {
        ProviderError::QueryError { status: 404, .. } => ProviderError::AccountUnavailable(account_id.to_string()),
        e => e,
    }
}
