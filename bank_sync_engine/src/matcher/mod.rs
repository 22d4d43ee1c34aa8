//! # Transaction matcher
//!
//! Maps one booked bank transaction onto the organizer's orders awaiting payment. The matcher is pure: it reads
//! nothing and writes nothing, so the orchestrator and the review tooling can call it freely.
//!
//! Evidence comes in three tiers:
//! * **High**: the order code, or one of the order's invoice numbers, appears verbatim as a whole word.
//! * **Medium**: the code appears once case and separators are ignored, or an invoice number matches once
//!   separators and leading zeros are stripped.
//! * **Low**: there is no code evidence at all, but the amount singles out one order (optionally helped by the payer
//!   name).
//!
//! Orders in another currency are never candidates.
mod patterns;
mod transaction_matcher;

pub use patterns::{InvoiceReference, ReferencePatterns, DEFAULT_ORDER_CODE_PATTERN};
pub use transaction_matcher::{MatchInput, MatchResolution, MatcherConfig, TransactionMatcher};
