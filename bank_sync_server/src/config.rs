use std::{env, str::FromStr, time::Duration as StdDuration};

use bank_providers::{EnableBankingConfig, GoCardlessConfig, RetryPolicy};
use bank_sync_common::{
    helpers::{parse_boolean_flag, parse_list},
    Secret,
};
use bank_sync_engine::{matcher::DEFAULT_ORDER_CODE_PATTERN, LifecycleConfig, MatcherConfig, SyncConfig};
use chrono::Duration;
use log::*;

const DEFAULT_BSYNC_HOST: &str = "127.0.0.1";
const DEFAULT_BSYNC_PORT: u16 = 8370;
const DEFAULT_SYNC_INTERVAL: Duration = Duration::hours(6);
const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::minutes(10);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Key for the stored bank credentials, as 64 hex characters or base64. If empty, a throwaway key is used.
    pub credential_key: Secret<String>,
    /// Signs the state token that travels through the bank's redirect flow.
    pub state_secret: Secret<String>,
    /// Admin API requests must present this key in the `X-Api-Key` header. If empty, the admin API rejects everything.
    pub api_key: Secret<String>,
    /// Time between scheduled sync runs.
    pub sync_interval: Duration,
    /// How long an account holder has to finish the bank redirect. State tokens expire after the same time.
    pub authorization_timeout: Duration,
    pub retry_attempts: u32,
    pub sync: SyncConfig,
    pub lifecycle: LifecycleConfig,
    pub matcher: MatcherSettings,
    pub gocardless: Option<GoCardlessConfig>,
    pub enable_banking: Option<EnableBankingConfig>,
}

#[derive(Clone, Debug)]
pub struct MatcherSettings {
    pub order_code_pattern: String,
    pub invoice_prefixes: Vec<String>,
    pub config: MatcherConfig,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            order_code_pattern: DEFAULT_ORDER_CODE_PATTERN.to_string(),
            invoice_prefixes: vec![],
            config: MatcherConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BSYNC_HOST.to_string(),
            port: DEFAULT_BSYNC_PORT,
            database_url: String::default(),
            credential_key: Secret::default(),
            state_secret: Secret::default(),
            api_key: Secret::default(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
            retry_attempts: RetryPolicy::default().max_attempts,
            sync: SyncConfig::default(),
            lifecycle: LifecycleConfig::default(),
            matcher: MatcherSettings::default(),
            gocardless: None,
            enable_banking: None,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let host = env::var("BSYNC_HOST").ok().unwrap_or_else(|| DEFAULT_BSYNC_HOST.into());
        let port = env_or("BSYNC_PORT", DEFAULT_BSYNC_PORT);
        let database_url = env::var("BSYNC_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BSYNC_DATABASE_URL is not set. Please set it to the URL for the bank sync database.");
            String::default()
        });
        let credential_key = secret_from_env("BSYNC_CREDENTIAL_KEY", || {
            warn!(
                "🚨️🚨️🚨️ BSYNC_CREDENTIAL_KEY is not set. Bank credentials will be encrypted with a random key for \
                 this session only, and every connection will need reauthorizing after a restart. 🚨️🚨️🚨️"
            )
        });
        let state_secret = secret_from_env("BSYNC_STATE_SECRET", || {
            warn!(
                "🚨️ BSYNC_STATE_SECRET is not set. A random secret is used, so authorizations in flight will fail \
                 after a restart."
            )
        });
        let api_key = secret_from_env("BSYNC_API_KEY", || {
            error!("🪛️ BSYNC_API_KEY is not set. Every admin API request will be rejected.")
        });
        let sync_interval = env_minutes("BSYNC_SYNC_INTERVAL_MINS", defaults.sync_interval);
        let authorization_timeout = env_minutes("BSYNC_AUTHORIZATION_TIMEOUT_MINS", defaults.authorization_timeout);
        let retry_attempts = env_or("BSYNC_RETRY_ATTEMPTS", defaults.retry_attempts);
        let sync = SyncConfig {
            budget: StdDuration::from_secs(env_or("BSYNC_SYNC_BUDGET_SECS", defaults.sync.budget.as_secs())),
            concurrency: env_or("BSYNC_SYNC_CONCURRENCY", defaults.sync.concurrency).max(1),
            max_syncs_per_day: env_or("BSYNC_MAX_SYNCS_PER_DAY", defaults.sync.max_syncs_per_day),
            ..defaults.sync
        };
        let lifecycle = LifecycleConfig {
            expiry_threshold: Duration::days(env_or(
                "BSYNC_EXPIRY_THRESHOLD_DAYS",
                defaults.lifecycle.expiry_threshold.num_days(),
            )),
            failure_escalation: env_or("BSYNC_FAILURE_ESCALATION", defaults.lifecycle.failure_escalation),
            ..defaults.lifecycle
        };
        let matcher = MatcherSettings::from_env_or_default();
        let gocardless = GoCardlessConfig::from_env();
        let enable_banking = EnableBankingConfig::from_env();
        if gocardless.is_none() && enable_banking.is_none() {
            warn!("🪛️ No bank provider is configured. Bank connections cannot be created or synced.");
        }
        Self {
            host,
            port,
            database_url,
            credential_key,
            state_secret,
            api_key,
            sync_interval,
            authorization_timeout,
            retry_attempts,
            sync,
            lifecycle,
            matcher,
            gocardless,
            enable_banking,
            ..defaults
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.retry_attempts)
    }
}

impl MatcherSettings {
    pub fn from_env_or_default() -> Self {
        let order_code_pattern =
            env::var("BSYNC_ORDER_CODE_PATTERN").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| {
                debug!("🪛️ BSYNC_ORDER_CODE_PATTERN is not set. Using {DEFAULT_ORDER_CODE_PATTERN}");
                DEFAULT_ORDER_CODE_PATTERN.to_string()
            });
        let invoice_prefixes = env::var("BSYNC_INVOICE_PREFIXES").map(|s| parse_list(&s)).unwrap_or_default();
        if invoice_prefixes.is_empty() {
            info!("🪛️ No invoice prefixes are configured. Invoice numbers will not be matched.");
        }
        let auto_match_medium = parse_boolean_flag(env::var("BSYNC_AUTO_MATCH_MEDIUM").ok(), false);
        if auto_match_medium {
            warn!("🪛️ Medium-confidence matches will be settled without review.");
        }
        let auto_match_partial = parse_boolean_flag(env::var("BSYNC_AUTO_MATCH_PARTIAL").ok(), true);
        if !auto_match_partial {
            info!("🪛️ Part payments will be sent for review.");
        }
        let config = MatcherConfig { auto_match_medium, auto_match_partial, ..MatcherConfig::default() };
        Self { order_code_pattern, invoice_prefixes, config }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

fn env_minutes(name: &str, default: Duration) -> Duration {
    Duration::minutes(env_or(name, default.num_minutes()))
}

fn secret_from_env(name: &str, when_missing: impl FnOnce()) -> Secret<String> {
    match env::var(name) {
        Ok(s) if !s.trim().is_empty() => Secret::new(s.trim().to_string()),
        _ => {
            when_missing();
            Secret::default()
        },
    }
}
