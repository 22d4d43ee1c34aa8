//! # Bank sync server
//! The daemon that hosts the bank sync engine. It is responsible for:
//! * Syncing every bank connection on a schedule, and expiring redirect flows that were never completed.
//! * Serving the admin API that organizers use to connect banks and resolve transactions the matcher could not.
//! * Receiving the redirect back from the bank at the end of an authorization.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/callback`: Where banks send the account holder back to after authorizing access.
//! * `/api/...`: The admin API. Every request must carry the configured key in the `X-Api-Key` header.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod hooks;
pub mod routes;
pub mod server;
pub mod sync_worker;

#[cfg(test)]
mod endpoint_tests;
