//! Wire types for the Enable Banking API.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Access {
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aspsp<'a> {
    pub name: &'a str,
    pub country: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAuthorization<'a> {
    pub access: Access,
    pub aspsp: Aspsp<'a>,
    pub state: &'a str,
    pub redirect_url: &'a str,
    pub psu_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartAuthorizationResponse {
    pub url: String,
    pub authorization_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSession<'a> {
    pub code: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub access: Access,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub status: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    pub access: Option<Access>,
}

impl Session {
    pub fn is_authorized(&self) -> bool {
        self.status == "AUTHORIZED"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountIdentification {
    pub iban: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountDetails {
    pub account_id: Option<AccountIdentification>,
    pub currency: Option<String>,
    pub name: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Amount {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Party {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub entry_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_amount: Amount,
    /// `CRDT` for incoming, `DBIT` for outgoing
    pub credit_debit_indicator: String,
    /// `BOOK` or `PDNG` (and a few rarer ones treated as pending)
    pub status: Option<String>,
    pub booking_date: Option<NaiveDate>,
    pub value_date: Option<NaiveDate>,
    #[serde(default)]
    pub remittance_information: Vec<String>,
    pub debtor: Option<Party>,
    pub debtor_account: Option<AccountIdentification>,
    pub creditor: Option<Party>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsResponse {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    pub continuation_key: Option<String>,
}
