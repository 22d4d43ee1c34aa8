//! Bank data providers
//!
//! Every supported open-banking aggregator is wrapped in an adapter that implements [`BankProvider`]. The engine only
//! ever sees the normalized types in [`data_objects`] and the error taxonomy in [`ProviderError`]; status codes,
//! payload shapes and pagination schemes stay inside the adapter.
mod any_provider;
mod error;
mod provider;
mod rest;

pub mod data_objects;
pub mod enable_banking;
pub mod gocardless;
pub mod retry;
pub mod state_token;

pub use any_provider::AnyProvider;
pub use data_objects::{
    AuthorizationGrant,
    AuthorizationRequest,
    AuthorizationStart,
    BookingStatus,
    Credential,
    ExternalAccount,
    PageCursor,
    ProviderKind,
    RawTransaction,
    TransactionPage,
};
pub use enable_banking::{EnableBankingConfig, EnableBankingProvider};
pub use error::ProviderError;
pub use gocardless::{GoCardlessConfig, GoCardlessProvider};
pub use provider::BankProvider;
pub use retry::RetryPolicy;
pub use state_token::{StateClaims, StateSigner, StateTokenError};
