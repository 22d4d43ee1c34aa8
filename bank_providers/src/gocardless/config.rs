use std::time::Duration;

use bank_sync_common::Secret;
use log::*;

pub const GOCARDLESS_BASE_URL: &str = "https://bankaccountdata.gocardless.com/api/v2";

#[derive(Debug, Clone)]
pub struct GoCardlessConfig {
    pub base_url: String,
    pub secret_id: Secret<String>,
    pub secret_key: Secret<String>,
    /// How far back the first sync of a new account reaches.
    pub max_historical_days: i64,
    /// Requested consent duration. Banks may grant less.
    pub access_valid_for_days: i64,
    /// Size of each transaction page, in days.
    pub page_window_days: i64,
    /// Days re-fetched at the end of a completed sync to catch late bookings.
    pub overlap_days: i64,
    pub user_language: Option<String>,
    pub timeout: Duration,
}

impl Default for GoCardlessConfig {
    fn default() -> Self {
        Self {
            base_url: GOCARDLESS_BASE_URL.to_string(),
            secret_id: Secret::default(),
            secret_key: Secret::default(),
            max_historical_days: 90,
            access_valid_for_days: 90,
            page_window_days: 30,
            overlap_days: 3,
            user_language: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GoCardlessConfig {
    /// Returns `None` when no GoCardless application credentials are configured.
    pub fn from_env() -> Option<Self> {
        let secret_id = std::env::var("BSYNC_GOCARDLESS_SECRET_ID").ok().filter(|s| !s.is_empty());
        let secret_key = std::env::var("BSYNC_GOCARDLESS_SECRET_KEY").ok().filter(|s| !s.is_empty());
        let (secret_id, secret_key) = match (secret_id, secret_key) {
            (Some(id), Some(key)) => (Secret::new(id), Secret::new(key)),
            (None, None) => {
                info!("🏦️ GoCardless credentials are not set. The GoCardless provider is disabled.");
                return None;
            },
            _ => {
                warn!(
                    "🏦️ Only one of BSYNC_GOCARDLESS_SECRET_ID and BSYNC_GOCARDLESS_SECRET_KEY is set. The GoCardless \
                     provider is disabled."
                );
                return None;
            },
        };
        let defaults = Self::default();
        let base_url = std::env::var("BSYNC_GOCARDLESS_BASE_URL").unwrap_or_else(|_| {
            debug!("🏦️ BSYNC_GOCARDLESS_BASE_URL not set, using {GOCARDLESS_BASE_URL}");
            GOCARDLESS_BASE_URL.to_string()
        });
        let max_historical_days = env_days("BSYNC_GOCARDLESS_MAX_HISTORY_DAYS", defaults.max_historical_days);
        let access_valid_for_days = env_days("BSYNC_GOCARDLESS_ACCESS_DAYS", defaults.access_valid_for_days);
        let page_window_days = env_days("BSYNC_GOCARDLESS_WINDOW_DAYS", defaults.page_window_days);
        let user_language = std::env::var("BSYNC_GOCARDLESS_LANGUAGE").ok();
        let timeout = std::env::var("BSYNC_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        Some(Self {
            base_url,
            secret_id,
            secret_key,
            max_historical_days,
            access_valid_for_days,
            page_window_days,
            user_language,
            timeout,
            ..defaults
        })
    }
}

fn env_days(var: &str, default: i64) -> i64 {
    match std::env::var(var).map(|s| s.parse::<i64>()) {
        Ok(Ok(days)) if days > 0 => days,
        Ok(_) => {
            warn!("🏦️ {var} is not a positive number of days. Using the default of {default}.");
            default
        },
        Err(_) => default,
    }
}
