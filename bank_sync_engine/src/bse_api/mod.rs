//! # Bank sync engine public API
//!
//! The `bse_api` module is what the admin surface talks to.
//!
//! * [`connection_api`] starts and completes the redirect flow that authorizes a bank connection, reauthorizes and
//!   disconnects connections, and reports on their status.
//! * [`review_api`] exposes the transactions that could not be matched automatically, and lets an operator approve
//!   (optionally as a split over several orders) or discard them.
//!
//! Scheduled syncing lives in [`crate::sync`].
pub mod connection_api;
pub mod errors;
pub mod review_api;
