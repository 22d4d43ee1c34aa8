//! Wire types for the GoCardless Bank Account Data API.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct NewTokenRequest<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub access_expires: i64,
    pub refresh: String,
    pub refresh_expires: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access: String,
    pub access_expires: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAgreement<'a> {
    pub institution_id: &'a str,
    pub max_historical_days: i64,
    pub access_valid_for_days: i64,
    pub access_scope: [&'static str; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agreement {
    pub id: String,
    pub created: Option<DateTime<Utc>>,
    pub accepted: Option<DateTime<Utc>>,
    pub access_valid_for_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRequisition<'a> {
    pub redirect: &'a str,
    pub institution_id: &'a str,
    pub reference: &'a str,
    pub agreement: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_language: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Requisition {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub agreement: Option<String>,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl Requisition {
    pub fn is_linked(&self) -> bool {
        self.status == "LN"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountDetailsResponse {
    pub account: AccountDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    pub iban: Option<String>,
    pub currency: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: BookedAndPending,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookedAndPending {
    #[serde(default)]
    pub booked: Vec<Transaction>,
    #[serde(default)]
    pub pending: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Amount {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountReference {
    pub iban: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: Option<String>,
    pub internal_transaction_id: Option<String>,
    pub booking_date: Option<NaiveDate>,
    pub value_date: Option<NaiveDate>,
    pub transaction_amount: Amount,
    pub remittance_information_unstructured: Option<String>,
    #[serde(default)]
    pub remittance_information_unstructured_array: Vec<String>,
    pub remittance_information_structured: Option<String>,
    pub debtor_name: Option<String>,
    pub debtor_account: Option<AccountReference>,
    pub creditor_name: Option<String>,
}

impl Transaction {
    pub fn remittance(&self) -> String {
        self.remittance_information_unstructured
            .iter()
            .chain(self.remittance_information_unstructured_array.iter())
            .chain(self.remittance_information_structured.iter())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<&str>>()
            .join(" ")
    }
}
