use std::{fmt::Display, str::FromStr};

use bank_sync_common::{CurrencyCode, MinorUnits, Secret};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{state_token::StateClaims, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "gocardless")]
    GoCardless,
    #[serde(rename = "enable_banking")]
    EnableBanking,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoCardless => "gocardless",
            Self::EnableBanking => "enable_banking",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gocardless" | "nordigen" => Ok(Self::GoCardless),
            "enable_banking" | "enablebanking" => Ok(Self::EnableBanking),
            _ => Err(ProviderError::Initialization(format!("Unknown provider: {s}"))),
        }
    }
}

/// Opaque credential material for one bank connection.
///
/// `reference` identifies the grant at the provider: the requisition id for GoCardless and the session id for Enable
/// Banking. The engine stores the whole struct encrypted and never looks inside the tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub provider: ProviderKind,
    pub reference: String,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    /// When the account holder's consent runs out. Past this point only a fresh redirect flow helps.
    pub consent_expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(provider: ProviderKind, reference: String, consent_expires_at: DateTime<Utc>) -> Self {
        Self {
            provider,
            reference,
            access_token: None,
            refresh_token: None,
            access_expires_at: None,
            refresh_expires_at: None,
            consent_expires_at,
        }
    }

    pub fn consent_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.consent_expires_at - now
    }

    pub fn consent_expired(&self, now: DateTime<Utc>) -> bool {
        self.consent_expires_at <= now
    }

    /// True if the access token runs out within `margin` of `now`. Credentials without an access token (signed
    /// per request) never expire this way.
    pub fn access_expiring(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match (&self.access_token, self.access_expires_at) {
            (Some(_), Some(expiry)) => expiry - margin <= now,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub external_id: String,
    pub iban: Option<String>,
    pub currency: Option<CurrencyCode>,
    pub display_name: Option<String>,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Booked,
    Pending,
}

/// A bank transaction in the shape every provider is normalized into. Incoming money is positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub external_id: String,
    pub account_id: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub value_date: Option<NaiveDate>,
    pub booking_date: Option<NaiveDate>,
    pub payer_name: Option<String>,
    pub payer_iban: Option<String>,
    /// Remittance text, all lines joined with a single space.
    pub remittance: String,
    pub booking_status: BookingStatus,
}

impl RawTransaction {
    pub fn is_booked(&self) -> bool {
        self.booking_status == BookingStatus::Booked
    }

    /// The date we show and match against: booking date, falling back to value date.
    pub fn date(&self) -> Option<NaiveDate> {
        self.booking_date.or(self.value_date)
    }
}

/// Where to continue fetching from. Stored verbatim by the engine and handed back on the next sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageCursor {
    /// Nothing has been ingested yet. The provider decides how far back to go.
    Start,
    Date { from: NaiveDate },
    Continuation { date_from: NaiveDate, key: String },
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::Start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub transactions: Vec<RawTransaction>,
    pub next_cursor: PageCursor,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub organizer: String,
    /// Provider-specific institution id. Enable Banking uses `CC:Name`, e.g. `FI:Nordea`.
    pub institution_id: String,
    pub redirect_uri: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationStart {
    pub url: String,
    pub state: String,
    /// The provider's handle for the pending grant, if it issues one up front (GoCardless requisition id).
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationGrant {
    pub claims: StateClaims,
    pub credential: Credential,
}
