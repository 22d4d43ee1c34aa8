//! # Connection lifecycle
//!
//! A bank connection moves through the states in [`ConnectionState`](crate::db_types::ConnectionState). The
//! transition table lives in [`ConnectionState::apply`](crate::db_types::ConnectionState::apply) and is pure. The
//! [`LifecycleManager`] is the only thing that writes connection state, and it only does so for callers that hold
//! the connection's [`ConnectionClaim`].
mod errors;
mod locks;
mod manager;
mod registry;
mod state_machine;

pub use errors::LifecycleError;
pub use locks::{ConnectionClaim, ConnectionLocks};
pub use manager::{LifecycleConfig, LifecycleManager};
pub use registry::ProviderRegistry;
pub use state_machine::{IllegalTransition, LifecycleEvent};
