//! Failover router: ordered backend fallback with retries, glossary
//! verification, cache write-through, and budget gating

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::core::backend::{Backend, BackendReply, BackendRequest, HttpBackend};
use crate::core::config::{BackendConfig, RouterConfig};
use crate::core::errors::{BackendError, BackendErrorKind, Result, RouterError};
use crate::core::glossary::{GlossaryStore, TermConstraint};
use crate::core::ledger::CostLedger;
use crate::core::memory::{CacheEntry, CacheKey, TranslationMemory};
use crate::core::models::{AttemptRecord, TranslationJob, TranslationResult};

/// Retry behavior for one backend before failing over
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt per backend)
    pub max_retries: u32,
    /// Base backoff delay; doubles per retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        // retry is 1-based here; first retry waits base_delay
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(1000))
    }
}

/// One backend in the routing order, with its session-lifetime state
#[derive(Debug)]
struct BackendSlot {
    config: BackendConfig,
    adapter: Arc<dyn Backend>,
    /// Calls made against this backend, success or failure
    attempts: AtomicU64,
    /// Set on AUTH failure; the slot is skipped for the rest of the session
    disabled: AtomicBool,
}

impl BackendSlot {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_active(&self) -> bool {
        self.config.enabled && !self.disabled.load(Ordering::Acquire)
    }
}

/// Per-backend counters for the final report
#[derive(Debug, Clone)]
pub struct BackendStats {
    pub name: String,
    pub attempts: u64,
    pub disabled: bool,
}

/// The orchestration core. Holds the session context (glossary, cache,
/// ledger) explicitly so independent sessions can coexist; adapters hold
/// no reference back.
#[derive(Debug)]
pub struct FailoverRouter {
    slots: Vec<BackendSlot>,
    glossary: std::sync::RwLock<Arc<GlossaryStore>>,
    memory: Arc<TranslationMemory>,
    ledger: Arc<CostLedger>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl FailoverRouter {
    /// Assemble a router from adapters and session state. Backends are
    /// ordered by ascending priority; ties keep declaration order.
    pub fn new(
        backends: Vec<(BackendConfig, Arc<dyn Backend>)>,
        glossary: GlossaryStore,
        memory: Arc<TranslationMemory>,
        ledger: Arc<CostLedger>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        let mut slots: Vec<BackendSlot> = backends
            .into_iter()
            .map(|(config, adapter)| BackendSlot {
                config,
                adapter,
                attempts: AtomicU64::new(0),
                disabled: AtomicBool::new(false),
            })
            .collect();
        slots.sort_by(|a, b| a.config.priority.cmp(&b.config.priority));

        Self {
            slots,
            glossary: std::sync::RwLock::new(Arc::new(glossary)),
            memory,
            ledger,
            retry,
            attempt_timeout,
        }
    }

    /// Build a router with HTTP adapters from configuration. Backends
    /// with no resolvable credential are disabled up front rather than
    /// failing the whole session.
    pub fn from_config(config: &RouterConfig, glossary: GlossaryStore) -> Result<Self> {
        let attempt_timeout = Duration::from_millis(config.timeout_ms);
        let mut backends: Vec<(BackendConfig, Arc<dyn Backend>)> = Vec::new();

        for backend_config in &config.backends {
            match HttpBackend::new(backend_config.clone(), attempt_timeout) {
                Ok(adapter) => {
                    backends.push((backend_config.clone(), Arc::new(adapter)));
                }
                Err(e) => {
                    warn!("Disabling backend {}: {}", backend_config.name, e);
                    let mut disabled = backend_config.clone();
                    disabled.enabled = false;
                    // Placeholder adapter; never called while disabled
                    backends.push((
                        disabled.clone(),
                        Arc::new(UnavailableBackend {
                            name: disabled.name.clone(),
                        }),
                    ));
                }
            }
        }

        if !backends.iter().any(|(c, _)| c.enabled) {
            return Err(RouterError::NoBackendsAvailable);
        }

        Ok(Self::new(
            backends,
            glossary,
            Arc::new(TranslationMemory::new()),
            Arc::new(CostLedger::new(config.budget_limit)),
            RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_delay_ms),
            ),
            attempt_timeout,
        ))
    }

    /// Replace the session's translation memory, typically with one
    /// loaded from disk before the first job runs.
    pub fn with_memory(mut self, memory: Arc<TranslationMemory>) -> Self {
        self.memory = memory;
        self
    }

    /// Translate one job: cache check, budget gate, then ordered
    /// fallback across enabled backends.
    pub async fn translate_job(&self, job: &TranslationJob) -> Result<TranslationResult> {
        let started = Instant::now();
        let glossary = self.current_glossary();

        // 1. Translation memory short-circuit: no backend call, no cost
        let key = CacheKey::new(&job.source_text, job.target_language, glossary.version());
        if let Some(entry) = self.memory.get(&key).await {
            return Ok(TranslationResult {
                job_id: job.id.clone(),
                translated_text: entry.translated_text,
                backend_used: entry.backend_used,
                cost: 0.0,
                latency_ms: started.elapsed().as_millis() as u64,
                cache_hit: true,
                attempts: Vec::new(),
            });
        }

        // 2. Budget gate, checked once before the first network attempt.
        // reserve() claims the estimate under the ledger lock, so parallel
        // jobs cannot all squeeze through against the same balance; the
        // claim is released below once the job settles.
        let estimate = self
            .slots
            .iter()
            .find(|s| s.is_active())
            .map(|s| s.config.cost_per_job)
            .ok_or(RouterError::NoBackendsAvailable)?;

        if !self.ledger.reserve(estimate).await {
            return Err(RouterError::BudgetExceeded {
                spent: self.ledger.cumulative().await,
                limit: self.ledger.budget_limit(),
            });
        }

        let result = self.route_job(job, key, &glossary, started).await;
        self.ledger.release(estimate).await;
        result
    }

    /// Ordered fallback across enabled backends, run while the job's
    /// budget claim is held
    async fn route_job(
        &self,
        job: &TranslationJob,
        key: CacheKey,
        glossary: &GlossaryStore,
        started: Instant,
    ) -> Result<TranslationResult> {
        let constraints = glossary.constraints_for(&job.source_text, job.target_language);
        let request = BackendRequest {
            text: &job.source_text,
            source: job.source_language,
            target: job.target_language,
            constraints: &constraints,
        };

        // 3. Ordered fallback
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for slot in &self.slots {
            if !slot.is_active() {
                debug!("Skipping disabled backend {}", slot.name());
                continue;
            }

            let mut retry = 0u32;
            loop {
                if retry > 0 {
                    let delay = self.retry.delay_for(retry);
                    debug!(
                        "Retry {} of {} on {} after {:?}",
                        retry, self.retry.max_retries, slot.name(), delay
                    );
                    sleep(delay).await;
                }

                slot.attempts.fetch_add(1, Ordering::Relaxed);
                match self.attempt(slot, &request, &constraints).await {
                    Ok(reply) => {
                        attempts.push(AttemptRecord::success(slot.name()));
                        self.ledger.commit(reply.cost, slot.name()).await;
                        self.memory
                            .put(key, CacheEntry::new(&reply.text, slot.name()))
                            .await;

                        if retry > 0 {
                            info!("{} succeeded after {} retries", slot.name(), retry);
                        }
                        return Ok(TranslationResult {
                            job_id: job.id.clone(),
                            translated_text: reply.text,
                            backend_used: slot.name().to_string(),
                            cost: reply.cost,
                            latency_ms: started.elapsed().as_millis() as u64,
                            cache_hit: false,
                            attempts,
                        });
                    }
                    Err(err) => {
                        warn!("{} failed ({}): {}", slot.name(), err.kind, err.message);
                        attempts.push(AttemptRecord::failure(slot.name(), err.kind));

                        if err.kind == BackendErrorKind::Auth {
                            // Credentials will not heal mid-session
                            slot.disabled.store(true, Ordering::Release);
                            warn!("Backend {} disabled for this session", slot.name());
                            break;
                        }

                        if retry < self.retry.max_retries {
                            retry += 1;
                            continue;
                        }
                        break;
                    }
                }
            }
        }

        Err(RouterError::AllBackendsFailed { attempts })
    }

    /// One bounded call against one backend, with glossary verification.
    /// Returns the reply only when every applicable term is honored; a
    /// violating response costs real money and is committed to the ledger
    /// before being downgraded to a malformed-response failure.
    async fn attempt(
        &self,
        slot: &BackendSlot,
        request: &BackendRequest<'_>,
        constraints: &[TermConstraint],
    ) -> std::result::Result<BackendReply, BackendError> {
        let reply = match timeout(self.attempt_timeout, slot.adapter.translate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::new(
                    BackendErrorKind::Timeout,
                    format!("attempt exceeded {:?}", self.attempt_timeout),
                ));
            }
        };

        if let Some(violated) = constraints
            .iter()
            .find(|c| !reply.text.contains(&c.target_term))
        {
            self.ledger.commit(reply.cost, slot.name()).await;
            return Err(BackendError::new(
                BackendErrorKind::MalformedResponse,
                format!(
                    "glossary violation: output missing required rendering {:?} for {:?}",
                    violated.target_term, violated.source_term
                ),
            ));
        }

        Ok(reply)
    }

    fn current_glossary(&self) -> Arc<GlossaryStore> {
        self.glossary
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a freshly loaded glossary and drop cache entries keyed to
    /// the old version. The store itself stays immutable.
    pub async fn reload_glossary(&self, store: GlossaryStore) {
        let old_version = {
            let mut guard = self
                .glossary
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let old = guard.version();
            *guard = Arc::new(store);
            old
        };
        self.memory.invalidate_version(old_version).await;
        info!(
            "Glossary reloaded: v{} -> v{}",
            old_version,
            self.glossary_version()
        );
    }

    pub fn glossary_version(&self) -> u32 {
        self.current_glossary().version()
    }

    /// Backends still eligible for routing
    pub fn enabled_backend_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    /// Estimate used by the budget gate for the next job
    pub fn next_job_estimate(&self) -> Option<f64> {
        self.slots
            .iter()
            .find(|s| s.is_active())
            .map(|s| s.config.cost_per_job)
    }

    pub fn backend_stats(&self) -> Vec<BackendStats> {
        self.slots
            .iter()
            .map(|slot| BackendStats {
                name: slot.name().to_string(),
                attempts: slot.attempts.load(Ordering::Relaxed),
                disabled: !slot.is_active(),
            })
            .collect()
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn memory(&self) -> &Arc<TranslationMemory> {
        &self.memory
    }
}

/// Stand-in for a backend whose credentials never resolved. Kept in the
/// slot list (disabled) so reports still mention it.
#[derive(Debug)]
struct UnavailableBackend {
    name: String,
}

#[async_trait::async_trait]
impl Backend for UnavailableBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(
        &self,
        _request: &BackendRequest<'_>,
    ) -> std::result::Result<BackendReply, BackendError> {
        Err(BackendError::new(
            BackendErrorKind::Auth,
            "backend has no credentials",
        ))
    }
}
