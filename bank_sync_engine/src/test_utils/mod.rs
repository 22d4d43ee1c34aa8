//! Helpers for tests in this crate and its dependents. Enable with the `test_utils` feature.
pub mod prepare_env;
pub mod scripted_provider;

pub use scripted_provider::{page_cursor, ScriptedProvider};
