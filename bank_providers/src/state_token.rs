//! Signed state tokens for the authorization redirect flow.
//!
//! A state token is `base64url(claims_json) "." base64url(hmac_sha256(secret, claims_part))`. The claims bind the
//! flow to an organizer, an institution, a provider and the redirect URI the account holder is sent back to.
//! Tokens are deterministic for a given set of claims, so building the same request twice yields the same token.
use bank_sync_common::Secret;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{AuthorizationRequest, ProviderKind};

type HmacSha256 = Hmac<Sha256>;

/// Tokens from the future are tolerated up to this skew.
const CLOCK_SKEW_SECS: i64 = 60;
/// Bytes of the redirect URI's SHA-256 digest carried in the claims.
const REDIRECT_DIGEST_LEN: usize = 12;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("State token is malformed")]
    Malformed,
    #[error("State token signature does not match")]
    BadSignature,
    #[error("State token was issued for {0}")]
    WrongProvider(ProviderKind),
    #[error("State token has expired")]
    Expired,
    #[error("Invalid state signing key")]
    InvalidKey,
}

/// Field names are kept short because GoCardless stores the token as the requisition reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateClaims {
    #[serde(rename = "o")]
    pub organizer: String,
    #[serde(rename = "i")]
    pub institution_id: String,
    #[serde(rename = "p")]
    pub provider: ProviderKind,
    #[serde(rename = "n")]
    pub nonce: String,
    #[serde(rename = "t")]
    pub issued_at: i64,
    /// Truncated digest of the redirect URI. See [`redirect_digest`].
    #[serde(rename = "r")]
    pub redirect: String,
}

impl StateClaims {
    pub fn from_request(request: &AuthorizationRequest, provider: ProviderKind) -> Self {
        Self {
            organizer: request.organizer.clone(),
            institution_id: request.institution_id.clone(),
            provider,
            nonce: request.nonce.clone(),
            issued_at: request.issued_at.timestamp(),
            redirect: redirect_digest(&request.redirect_uri),
        }
    }

    /// True if the token was issued for a flow that returns to `redirect_uri`.
    pub fn matches_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect == redirect_digest(redirect_uri)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.issued_at, 0).single().unwrap_or_default()
    }
}

/// The URI itself would push GoCardless references past their length limit, so only a digest is signed.
pub fn redirect_digest(redirect_uri: &str) -> String {
    let digest = Sha256::digest(redirect_uri.as_bytes());
    base64::encode_config(&digest[..REDIRECT_DIGEST_LEN], base64::URL_SAFE_NO_PAD)
}

#[derive(Clone)]
pub struct StateSigner {
    key: HmacSha256,
    validity: Duration,
}

impl StateSigner {
    pub fn new(secret: &Secret<Vec<u8>>, validity: Duration) -> Result<Self, StateTokenError> {
        if secret.reveal().is_empty() {
            return Err(StateTokenError::InvalidKey);
        }
        let key = HmacSha256::new_from_slice(secret.reveal()).map_err(|_| StateTokenError::InvalidKey)?;
        Ok(Self { key, validity })
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn sign(&self, claims: &StateClaims) -> String {
        // Serializing a struct of strings and integers cannot fail
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let payload = base64::encode_config(json, base64::URL_SAFE_NO_PAD);
        let signature = self.mac(payload.as_bytes()).finalize().into_bytes();
        let signature = base64::encode_config(signature, base64::URL_SAFE_NO_PAD);
        format!("{payload}.{signature}")
    }

    pub fn verify(
        &self,
        token: &str,
        provider: ProviderKind,
        now: DateTime<Utc>,
    ) -> Result<StateClaims, StateTokenError> {
        let (payload, signature) = token.split_once('.').ok_or(StateTokenError::Malformed)?;
        let signature =
            base64::decode_config(signature, base64::URL_SAFE_NO_PAD).map_err(|_| StateTokenError::Malformed)?;
        self.mac(payload.as_bytes()).verify_slice(&signature).map_err(|_| StateTokenError::BadSignature)?;
        let json = base64::decode_config(payload, base64::URL_SAFE_NO_PAD).map_err(|_| StateTokenError::Malformed)?;
        let claims = serde_json::from_slice::<StateClaims>(&json).map_err(|_| StateTokenError::Malformed)?;
        if claims.provider != provider {
            return Err(StateTokenError::WrongProvider(claims.provider));
        }
        let issued_at = claims.issued_at();
        if issued_at > now + Duration::seconds(CLOCK_SKEW_SECS) || issued_at + self.validity < now {
            return Err(StateTokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(data);
        mac
    }
}
