//! Request signing. Enable Banking authenticates the application, not the session, with a short-lived RS256 JWT.
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::ProviderError;

const ISSUER: &str = "enablebanking.com";
const AUDIENCE: &str = "api.enablebanking.com";
const LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub(crate) struct RequestSigner {
    application_id: String,
    key: EncodingKey,
}

impl RequestSigner {
    pub fn new(application_id: &str, private_key_pem: &str) -> Result<Self, ProviderError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| ProviderError::Initialization(format!("Invalid Enable Banking private key: {e}")))?;
        Ok(Self { application_id: application_id.to_string(), key })
    }

    pub fn token(&self, now: DateTime<Utc>) -> Result<String, ProviderError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.application_id.clone());
        let iat = now.timestamp();
        let claims = Claims { iss: ISSUER, aud: AUDIENCE, iat, exp: iat + LIFETIME_SECS };
        encode(&header, &claims, &self.key).map_err(|e| ProviderError::Initialization(format!("Could not sign JWT: {e}")))
    }
}
