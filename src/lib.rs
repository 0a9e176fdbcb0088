//! Polyroute - multi-backend translation router
//!
//! Translates short technical catalog phrases across sixteen target
//! languages by routing each job through an ordered chain of LLM
//! backends, with glossary enforcement, a translation memory, and a
//! hard cost budget.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;

// Re-export key types for convenience
pub use crate::core::{
    backend::{Backend, BackendReply, BackendRequest, HttpBackend},
    batch::{BatchCoordinator, BatchProgress, CancelHandle, RunReport, StopReason},
    config::{BackendConfig, RouterConfig},
    errors::{BackendError, BackendErrorKind, RouterError},
    glossary::{GlossaryEntry, GlossaryStore, TermConstraint},
    ledger::{CostLedger, LedgerSnapshot},
    memory::{CacheEntry, CacheKey, TranslationMemory},
    models::{AttemptOutcome, AttemptRecord, Language, TranslationJob, TranslationResult},
    router::{FailoverRouter, RetryPolicy},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
