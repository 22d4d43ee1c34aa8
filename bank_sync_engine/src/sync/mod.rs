//! # Sync orchestrator
//!
//! Pulls transactions for one connection at a time, hands booked ones to the matcher and settles the matches with
//! the host. Each connection is synced while holding its claim, under a hard time budget.
//!
//! Cursors are saved only after every transaction on a page has been stored and evaluated. An interrupted run
//! therefore re-fetches at most one page, and payment creation is idempotent on (connection, transaction id), so the
//! re-fetched transactions never produce a second payment.
mod orchestrator;
mod settlement;

pub use orchestrator::{SyncConfig, SyncOrchestrator};
pub use settlement::{settle_payment, SettlementError};
pub(crate) use settlement::existing_payments;
