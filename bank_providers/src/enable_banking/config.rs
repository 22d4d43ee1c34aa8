use std::time::Duration;

use bank_sync_common::Secret;
use log::*;

pub const ENABLE_BANKING_BASE_URL: &str = "https://api.enablebanking.com";

#[derive(Debug, Clone)]
pub struct EnableBankingConfig {
    pub base_url: String,
    /// Application id. Used as the `kid` of every request JWT.
    pub application_id: String,
    /// PEM-encoded RSA private key registered with the application.
    pub private_key: Secret<String>,
    /// Requested session validity. Banks may grant less.
    pub session_validity_days: i64,
    pub max_historical_days: i64,
    pub overlap_days: i64,
    /// `business` or `personal`
    pub psu_type: String,
    pub timeout: Duration,
}

impl Default for EnableBankingConfig {
    fn default() -> Self {
        Self {
            base_url: ENABLE_BANKING_BASE_URL.to_string(),
            application_id: String::new(),
            private_key: Secret::default(),
            session_validity_days: 10,
            max_historical_days: 90,
            overlap_days: 3,
            psu_type: "business".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl EnableBankingConfig {
    /// Returns `None` when no Enable Banking application is configured.
    pub fn from_env() -> Option<Self> {
        let application_id = std::env::var("BSYNC_ENABLE_BANKING_APP_ID").ok().filter(|s| !s.is_empty());
        let Some(application_id) = application_id else {
            info!("🏦️ BSYNC_ENABLE_BANKING_APP_ID is not set. The Enable Banking provider is disabled.");
            return None;
        };
        let key_path = match std::env::var("BSYNC_ENABLE_BANKING_KEY_PATH") {
            Ok(p) => p,
            Err(_) => {
                error!("🏦️ BSYNC_ENABLE_BANKING_KEY_PATH is not set. The Enable Banking provider is disabled.");
                return None;
            },
        };
        let private_key = match std::fs::read_to_string(&key_path) {
            Ok(pem) => Secret::new(pem),
            Err(e) => {
                error!("🏦️ Could not read the Enable Banking private key at {key_path}: {e}. The provider is disabled.");
                return None;
            },
        };
        let defaults = Self::default();
        let base_url = std::env::var("BSYNC_ENABLE_BANKING_BASE_URL").unwrap_or_else(|_| {
            debug!("🏦️ BSYNC_ENABLE_BANKING_BASE_URL not set, using {ENABLE_BANKING_BASE_URL}");
            ENABLE_BANKING_BASE_URL.to_string()
        });
        let session_validity_days = std::env::var("BSYNC_ENABLE_BANKING_SESSION_DAYS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|d| *d > 0)
            .unwrap_or(defaults.session_validity_days);
        let psu_type = std::env::var("BSYNC_ENABLE_BANKING_PSU_TYPE").unwrap_or(defaults.psu_type.clone());
        let timeout = std::env::var("BSYNC_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        Some(Self { base_url, application_id, private_key, session_validity_days, psu_type, timeout, ..defaults })
    }
}
