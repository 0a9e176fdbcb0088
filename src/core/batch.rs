//! Batch coordinator: fans jobs out across the router under a
//! concurrency limit, tracks progress, and assembles the final report

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::ledger::LedgerSnapshot;
use crate::core::models::{TranslationJob, TranslationResult};
use crate::core::router::FailoverRouter;

/// Latency window for the moving-average ETA
const RECENT_WINDOW: usize = 20;

/// Cooperative cancellation signal. In-flight jobs finish their current
/// backend attempt; nothing new is dispatched once observed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Progress snapshot pushed to the callback after each completed job
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Moving-average estimate; None until the first job lands
    pub estimated_remaining: Option<Duration>,
    pub cost_so_far: f64,
}

/// Why dispatch stopped before the job list was drained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    BudgetExhausted,
    Cancelled,
    BackendsUnavailable,
}

/// One failed job, with enough context to retry just the failed subset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: String,
    pub source_text: String,
    pub target_language: String,
    pub error: String,
}

/// Final report for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TranslationResult>,
    pub failures: Vec<JobFailure>,
    /// Jobs never dispatched because the run stopped early
    pub skipped: usize,
    pub total: usize,
    pub cache_hits: usize,
    pub cache_hit_rate: f64,
    /// Successful translations per backend
    pub backend_usage: HashMap<String, u64>,
    pub ledger: LedgerSnapshot,
    pub stop_reason: Option<StopReason>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Human-readable summary for the CLI
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Completed: {} / {} ({} from cache, {} failed, {} skipped)\n",
            self.results.len(),
            self.total,
            self.cache_hits,
            self.failures.len(),
            self.skipped
        ));
        out.push_str(&format!(
            "Cost: {:.2} of {:.2} budget; cache hit rate {:.1}%\n",
            self.ledger.cumulative_cost,
            self.ledger.budget_limit,
            self.cache_hit_rate * 100.0
        ));
        let mut usage: Vec<(&String, &u64)> = self.backend_usage.iter().collect();
        usage.sort();
        for (backend, count) in usage {
            out.push_str(&format!("  {}: {} translation(s)\n", backend, count));
        }
        if let Some(reason) = &self.stop_reason {
            out.push_str(&format!("Stopped early: {:?}\n", reason));
        }
        for failure in &self.failures {
            out.push_str(&format!(
                "  FAILED {} [{}]: {}\n",
                failure.job_id, failure.target_language, failure.error
            ));
        }
        out
    }
}

type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Drives a job list through the router with a bounded worker pool.
/// Results complete in no particular order; per-job failures never abort
/// the batch.
pub struct BatchCoordinator {
    router: Arc<FailoverRouter>,
    concurrency: usize,
    cancel: CancelHandle,
    progress: Option<ProgressCallback>,
    results_tx: Option<mpsc::UnboundedSender<TranslationResult>>,
}

impl BatchCoordinator {
    pub fn new(router: Arc<FailoverRouter>, concurrency: usize) -> Self {
        Self {
            router,
            concurrency: concurrency.max(1),
            cancel: CancelHandle::new(),
            progress: None,
            results_tx: None,
        }
    }

    /// Subscribe to completed translations in completion order, delivered
    /// as each job finishes rather than after the whole batch. The final
    /// report still collects everything.
    pub fn result_stream(&mut self) -> mpsc::UnboundedReceiver<TranslationResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.results_tx = Some(tx);
        rx
    }

    /// Register a progress callback, invoked after every completed job
    pub fn with_progress(mut self, callback: impl Fn(BatchProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Handle for cancelling the run from outside
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Should dispatch stop? Checked before every spawn; all three
    /// conditions are sticky once they trip.
    async fn stop_reason(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        match self.router.next_job_estimate() {
            None => Some(StopReason::BackendsUnavailable),
            Some(estimate) => {
                if self.router.ledger().is_exhausted(estimate).await {
                    Some(StopReason::BudgetExhausted)
                } else {
                    None
                }
            }
        }
    }

    /// Run the whole batch to completion (or early stop). In-flight jobs
    /// always finish; completed results are never discarded.
    pub async fn run(&self, jobs: Vec<TranslationJob>) -> RunReport {
        let total = jobs.len();
        let started = Instant::now();
        info!(
            "Batch start: {} jobs, concurrency {}",
            total, self.concurrency
        );

        let mut pending = jobs.into_iter();
        let mut in_flight: JoinSet<(TranslationJob, crate::core::errors::Result<TranslationResult>, Duration)> =
            JoinSet::new();

        let mut results: Vec<TranslationResult> = Vec::new();
        let mut failures: Vec<JobFailure> = Vec::new();
        let mut recent_latencies: VecDeque<Duration> = VecDeque::with_capacity(RECENT_WINDOW);
        let mut stop_reason: Option<StopReason> = None;

        loop {
            // Fill the dispatch window
            while in_flight.len() < self.concurrency {
                if let Some(reason) = self.stop_reason().await {
                    if stop_reason.is_none() {
                        warn!("Dispatch stopped: {:?}", reason);
                        stop_reason = Some(reason);
                    }
                    break;
                }
                match pending.next() {
                    Some(job) => {
                        let router = Arc::clone(&self.router);
                        in_flight.spawn(async move {
                            let job_started = Instant::now();
                            let result = router.translate_job(&job).await;
                            (job, result, job_started.elapsed())
                        });
                    }
                    None => break,
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break; // nothing in flight and nothing left to dispatch
            };

            match joined {
                Ok((_job, Ok(result), latency)) => {
                    push_latency(&mut recent_latencies, latency);
                    if let Some(tx) = &self.results_tx {
                        // A dropped receiver just means nobody is streaming
                        let _ = tx.send(result.clone());
                    }
                    results.push(result);
                }
                Ok((job, Err(err), latency)) => {
                    push_latency(&mut recent_latencies, latency);
                    failures.push(JobFailure {
                        job_id: job.id,
                        source_text: job.source_text,
                        target_language: job.target_language.code().to_string(),
                        error: err.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!("Worker task failed: {}", join_err);
                    failures.push(JobFailure {
                        job_id: "<unknown>".to_string(),
                        source_text: String::new(),
                        target_language: String::new(),
                        error: join_err.to_string(),
                    });
                }
            }

            if let Some(callback) = &self.progress {
                let completed = results.len() + failures.len();
                callback(BatchProgress {
                    completed,
                    total,
                    elapsed: started.elapsed(),
                    estimated_remaining: estimate_remaining(
                        &recent_latencies,
                        total - completed,
                        self.concurrency,
                    ),
                    cost_so_far: self.router.ledger().cumulative().await,
                });
            }
        }

        let skipped = pending.count();
        let cache_hits = results.iter().filter(|r| r.cache_hit).count();
        let mut backend_usage: HashMap<String, u64> = HashMap::new();
        for result in &results {
            *backend_usage.entry(result.backend_used.clone()).or_default() += 1;
        }

        let report = RunReport {
            cache_hits,
            cache_hit_rate: self.router.memory().hit_rate(),
            backend_usage,
            ledger: self.router.ledger().snapshot().await,
            stop_reason,
            elapsed_ms: started.elapsed().as_millis() as u64,
            total,
            skipped,
            results,
            failures,
        };
        info!(
            "Batch done: {} ok, {} failed, {} skipped, cost {:.2}",
            report.results.len(),
            report.failures.len(),
            report.skipped,
            report.ledger.cumulative_cost
        );
        report
    }
}

fn push_latency(window: &mut VecDeque<Duration>, latency: Duration) {
    if window.len() == RECENT_WINDOW {
        window.pop_front();
    }
    window.push_back(latency);
}

/// ETA from the moving average of recent job latencies, scaled by the
/// worker pool size
fn estimate_remaining(
    recent: &VecDeque<Duration>,
    remaining_jobs: usize,
    concurrency: usize,
) -> Option<Duration> {
    if recent.is_empty() || remaining_jobs == 0 {
        return if remaining_jobs == 0 {
            Some(Duration::ZERO)
        } else {
            None
        };
    }
    let avg = recent.iter().sum::<Duration>() / recent.len() as u32;
    Some(avg * remaining_jobs as u32 / concurrency.max(1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{Backend, BackendReply, BackendRequest};
    use crate::core::config::BackendConfig;
    use crate::core::errors::{BackendError, BackendErrorKind};
    use crate::core::glossary::{GlossaryEntry, GlossaryStore};
    use crate::core::ledger::CostLedger;
    use crate::core::memory::TranslationMemory;
    use crate::core::models::Language;
    use crate::core::router::RetryPolicy;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    /// Echo backend: succeeds with a fixed suffix unless the source text
    /// contains a poison marker
    #[derive(Debug)]
    struct EchoBackend {
        name: String,
        cost: f64,
        delay: Duration,
        calls: AtomicU64,
    }

    impl EchoBackend {
        fn new(name: &str, cost: f64) -> Self {
            Self {
                name: name.to_string(),
                cost,
                delay: Duration::ZERO,
                calls: AtomicU64::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait::async_trait]
    impl Backend for EchoBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn translate(
            &self,
            request: &BackendRequest<'_>,
        ) -> std::result::Result<BackendReply, BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if request.text.contains("毒") {
                return Err(BackendError::new(BackendErrorKind::Unknown, "poisoned"));
            }
            let mut text = format!("{} [translated]", request.text);
            for constraint in request.constraints {
                text = text.replace(&constraint.source_term, &constraint.target_term);
            }
            Ok(BackendReply {
                text,
                cost: self.cost,
            })
        }
    }

    fn backend_config(name: &str, cost: f64) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            model: format!("{}-model", name),
            endpoint: "https://unused.example".to_string(),
            api_key: Some("k".to_string()),
            priority: 1,
            cost_per_job: cost,
            input_price_per_mtok: 30.0,
            output_price_per_mtok: 76.0,
            enabled: true,
        }
    }

    fn test_router(budget: f64, cost_per_job: f64) -> Arc<FailoverRouter> {
        test_router_with_delay(budget, cost_per_job, Duration::ZERO)
    }

    fn test_router_with_delay(
        budget: f64,
        cost_per_job: f64,
        delay: Duration,
    ) -> Arc<FailoverRouter> {
        let glossary = GlossaryStore::from_entries(
            1,
            vec![GlossaryEntry {
                source_term: "ショックキラー".to_string(),
                target_language: Language::English,
                target_term: "shock absorber".to_string(),
            }],
        )
        .unwrap();

        Arc::new(FailoverRouter::new(
            vec![(
                backend_config("grok", cost_per_job),
                Arc::new(EchoBackend::new("grok", cost_per_job).with_delay(delay)),
            )],
            glossary,
            Arc::new(TranslationMemory::new()),
            Arc::new(CostLedger::new(budget)),
            RetryPolicy::new(0, Duration::from_millis(1)),
            Duration::from_millis(500),
        ))
    }

    fn jobs(texts: &[&str]) -> Vec<TranslationJob> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| TranslationJob::new(format!("job-{}", i), *text, Language::English))
            .collect()
    }

    #[tokio::test]
    async fn test_batch_completes_all_jobs() {
        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 4);
        let report = coordinator
            .run(jobs(&["シリンダ", "チューブ", "ショックキラー"]))
            .await;

        assert_eq!(report.results.len(), 3);
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped, 0);
        assert!(report.stop_reason.is_none());
        assert_eq!(report.backend_usage["grok"], 3);

        // Glossary rendering survives the pipeline
        let shock = report
            .results
            .iter()
            .find(|r| r.job_id == "job-2")
            .unwrap();
        assert!(shock.translated_text.contains("shock absorber"));
    }

    #[tokio::test]
    async fn test_duplicate_texts_hit_cache() {
        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 1);
        let report = coordinator
            .run(jobs(&["ショックキラー", "ショックキラー", "ショックキラー"]))
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.cache_hits, 2);
        assert!(report.cache_hit_rate > 0.5);
        // Only the first job paid
        assert!((report.ledger.cumulative_cost - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_dispatch_but_keeps_results() {
        // Budget fits two jobs at cost 10; the gate refuses the third
        let coordinator = BatchCoordinator::new(test_router(25.0, 10.0), 1);
        let report = coordinator
            .run(jobs(&["一", "二", "三", "四", "五"]))
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.stop_reason, Some(StopReason::BudgetExhausted));
        // Bound: never more than budget + one job estimate
        assert!(report.ledger.cumulative_cost <= 25.0 + 10.0);
    }

    #[tokio::test]
    async fn test_budget_bound_holds_under_concurrent_workers() {
        // Five slow jobs race the gate at once; only two 10-unit claims
        // fit the 25-unit budget, so three jobs must be refused unbilled
        let router = test_router_with_delay(25.0, 10.0, Duration::from_millis(50));
        let coordinator = BatchCoordinator::new(router, 5);
        let report = coordinator
            .run(jobs(&["一", "二", "三", "四", "五"]))
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.results.len() + report.failures.len() + report.skipped,
            5
        );
        assert!((report.ledger.cumulative_cost - 20.0).abs() < 1e-9);
        assert!(report.ledger.cumulative_cost <= 25.0 + 10.0);
        // Any job that got dispatched past the coordinator's gate was
        // still refused by the router's claim, not billed
        for failure in &report.failures {
            assert!(failure.error.contains("budget exceeded"));
        }
    }

    #[tokio::test]
    async fn test_result_stream_delivers_completed_results() {
        let mut coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 1);
        let mut stream = coordinator.result_stream();

        let report = coordinator
            .run(jobs(&["一", "二", "三"]))
            .await;
        drop(coordinator);

        let mut streamed = Vec::new();
        while let Some(result) = stream.recv().await {
            streamed.push(result.job_id);
        }
        // Single worker: stream order is completion order is job order
        let reported: Vec<String> =
            report.results.iter().map(|r| r.job_id.clone()).collect();
        assert_eq!(streamed, vec!["job-0", "job-1", "job-2"]);
        assert_eq!(streamed, reported);
    }

    #[tokio::test]
    async fn test_zero_budget_skips_everything() {
        let coordinator = BatchCoordinator::new(test_router(0.0, 10.0), 2);
        let report = coordinator.run(jobs(&["一", "二"])).await;

        assert!(report.results.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.stop_reason, Some(StopReason::BudgetExhausted));
        assert_eq!(report.ledger.cumulative_cost, 0.0);
    }

    #[tokio::test]
    async fn test_job_failure_does_not_abort_batch() {
        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 1);
        let report = coordinator.run(jobs(&["一", "毒入り", "三"])).await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].job_id, "job-1");
        assert!(report.failures[0].error.contains("all backends failed"));
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_dispatch() {
        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 1);
        let handle = coordinator.cancel_handle();
        handle.cancel();

        let report = coordinator.run(jobs(&["一", "二", "三"])).await;
        assert!(report.results.is_empty());
        assert_eq!(report.skipped, 3);
        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_finish() {
        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 1);
        let handle = coordinator.cancel_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let coordinator = coordinator.with_progress(move |progress| {
            seen_clone.lock().unwrap().push(progress.completed);
            if progress.completed == 1 {
                handle.cancel();
            }
        });

        let report = coordinator.run(jobs(&["一", "二", "三", "四"])).await;
        // First job finished, nothing new was dispatched afterwards
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_progress_reports_monotone_completion_and_eta() {
        let progress_log = Arc::new(Mutex::new(Vec::<BatchProgress>::new()));
        let log_clone = Arc::clone(&progress_log);

        let coordinator = BatchCoordinator::new(test_router(1000.0, 10.0), 2)
            .with_progress(move |progress| log_clone.lock().unwrap().push(progress));

        coordinator.run(jobs(&["一", "二", "三"])).await;

        let log = progress_log.lock().unwrap();
        assert_eq!(log.len(), 3);
        let completed: Vec<usize> = log.iter().map(|p| p.completed).collect();
        assert_eq!(completed, vec![1, 2, 3]);
        assert_eq!(log.last().unwrap().total, 3);
        assert_eq!(
            log.last().unwrap().estimated_remaining,
            Some(Duration::ZERO)
        );
        assert!(log.last().unwrap().cost_so_far > 0.0);
    }

    #[test]
    fn test_estimate_remaining_scales_with_concurrency() {
        let mut recent = VecDeque::new();
        recent.push_back(Duration::from_millis(100));
        recent.push_back(Duration::from_millis(300));

        // avg 200ms, 10 jobs left, 2 workers -> ~1s
        let eta = estimate_remaining(&recent, 10, 2).unwrap();
        assert_eq!(eta, Duration::from_millis(1000));

        assert_eq!(estimate_remaining(&VecDeque::new(), 5, 2), None);
        assert_eq!(
            estimate_remaining(&recent, 0, 2),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_report_summary_mentions_failures() {
        let report = RunReport {
            results: vec![],
            failures: vec![JobFailure {
                job_id: "job-9".to_string(),
                source_text: "毒".to_string(),
                target_language: "en".to_string(),
                error: "all backends failed after 1 attempt(s)".to_string(),
            }],
            skipped: 0,
            total: 1,
            cache_hits: 0,
            cache_hit_rate: 0.0,
            backend_usage: HashMap::new(),
            ledger: LedgerSnapshot {
                cumulative_cost: 0.0,
                budget_limit: 100.0,
                per_backend_cost: HashMap::new(),
                per_backend_commits: HashMap::new(),
            },
            stop_reason: None,
            elapsed_ms: 5,
        };

        let summary = report.summary();
        assert!(summary.contains("FAILED job-9"));
        assert!(summary.contains("0 / 1"));
    }
}
