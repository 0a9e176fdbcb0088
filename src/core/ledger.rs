//! Cumulative spend tracking with a hard budget ceiling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LedgerState {
    cumulative: f64,
    /// Estimated spend claimed by jobs currently in flight
    reserved: f64,
    per_backend_cost: HashMap<String, f64>,
    per_backend_commits: HashMap<String, u64>,
}

/// Point-in-time view of the ledger for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cumulative_cost: f64,
    pub budget_limit: f64,
    pub per_backend_cost: HashMap<String, f64>,
    pub per_backend_commits: HashMap<String, u64>,
}

/// Session-wide cost ledger. `reserve` is the pre-flight gate: it claims
/// one job's estimated headroom under the write lock, so concurrent
/// workers can never admit more estimated spend than the budget holds.
/// `commit` records real spend, once per billed attempt; `release`
/// returns a job's claim when it settles. Cumulative cost only ever grows.
#[derive(Debug)]
pub struct CostLedger {
    budget_limit: f64,
    state: RwLock<LedgerState>,
}

impl CostLedger {
    pub fn new(budget_limit: f64) -> Self {
        Self {
            budget_limit,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Claim headroom for one job before its first network attempt. The
    /// check and the claim happen under a single write lock. Every
    /// successful reserve must be paired with a `release` once the job's
    /// real spend is committed (or the job failed without spending).
    pub async fn reserve(&self, estimate: f64) -> bool {
        let mut state = self.state.write().await;
        if state.cumulative + state.reserved + estimate <= self.budget_limit {
            state.reserved += estimate;
            true
        } else {
            warn!(
                "Budget gate refused estimate {:.4} (spent {:.4}, in flight {:.4}, limit {:.4})",
                estimate, state.cumulative, state.reserved, self.budget_limit
            );
            false
        }
    }

    /// Return a job's claimed headroom after its spend is committed
    pub async fn release(&self, estimate: f64) {
        let mut state = self.state.write().await;
        state.reserved = (state.reserved - estimate).max(0.0);
    }

    /// Record actual spend for one attempt. Append-only; the write lock
    /// makes concurrent commits linearizable so no update is lost.
    pub async fn commit(&self, actual_cost: f64, backend: &str) {
        let mut state = self.state.write().await;
        state.cumulative += actual_cost;
        *state.per_backend_cost.entry(backend.to_string()).or_default() += actual_cost;
        *state
            .per_backend_commits
            .entry(backend.to_string())
            .or_default() += 1;
        debug!(
            "Committed {:.4} for {} (cumulative {:.4})",
            actual_cost, backend, state.cumulative
        );
    }

    pub async fn cumulative(&self) -> f64 {
        self.state.read().await.cumulative
    }

    /// Estimated spend currently claimed by in-flight jobs
    pub async fn reserved(&self) -> f64 {
        self.state.read().await.reserved
    }

    pub async fn remaining(&self) -> f64 {
        let state = self.state.read().await;
        (self.budget_limit - state.cumulative).max(0.0)
    }

    /// True once no further job fits inside the budget, counting both
    /// committed spend and in-flight claims. Read-only.
    pub async fn is_exhausted(&self, next_estimate: f64) -> bool {
        let state = self.state.read().await;
        state.cumulative + state.reserved + next_estimate > self.budget_limit
    }

    pub fn budget_limit(&self) -> f64 {
        self.budget_limit
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().await;
        LedgerSnapshot {
            cumulative_cost: state.cumulative,
            budget_limit: self.budget_limit,
            per_backend_cost: state.per_backend_cost.clone(),
            per_backend_commits: state.per_backend_commits.clone(),
        }
    }
}
