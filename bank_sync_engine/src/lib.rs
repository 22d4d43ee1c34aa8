//! Bank Sync Engine
//!
//! The engine pulls bank transactions from open-banking providers and reconciles them against orders awaiting
//! payment. It is provider-agnostic: providers are reached through [`bank_providers::BankProvider`], and the host
//! platform's order and payment records through the traits in [`traits`].
//!
//! The library is divided into four main sections:
//! 1. The connection lifecycle ([`mod@lifecycle`]). Every bank connection moves through a small state machine
//!    (authorization, refresh, expiry, reauthorization, revocation). State only ever changes through the lifecycle
//!    manager, and only while holding the connection's claim.
//! 2. The transaction matcher ([`mod@matcher`]), a pure function from a transaction and a set of open orders to a
//!    resolution: auto-match, ambiguous, needs review or no match.
//! 3. The sync orchestrator ([`mod@sync`]) that ties the two together, one connection at a time.
//! 4. Storage ([`traits`] and the SQLite backend). You should never need to access the database directly. Use the
//!    public APIs instead; the data types in [`db_types`] are public.
//!
//! The engine emits events (payment confirmed, reauthorization required, consent expiring, sync failures escalated)
//! that the host can subscribe to through [`events::EventHooks`].
mod bse_api;
#[cfg(feature = "sqlite")]
mod sqlite;

pub mod db_types;
pub mod events;
pub mod helpers;
pub mod lifecycle;
pub mod matcher;
pub mod sync;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use bse_api::{
    connection_api::{ConnectionApi, ConnectionOverview},
    errors::{ConnectionApiError, ReviewError},
    review_api::ReviewApi,
};
pub use lifecycle::{LifecycleConfig, LifecycleManager, ProviderRegistry};
pub use matcher::{MatcherConfig, ReferencePatterns, TransactionMatcher};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use sync::{SyncConfig, SyncOrchestrator};
pub use traits::{
    BankSyncDatabase,
    BankSyncDatabaseError,
    ConnectionManagement,
    InsertPaymentResult,
    InsertTransactionResult,
    OrderManagement,
    TransactionManagement,
};
