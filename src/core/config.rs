//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Configuration for one backend provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Short name used in reports and attempt records
    pub name: String,
    /// Provider model identifier
    pub model: String,
    /// Chat-completions endpoint
    pub endpoint: String,
    /// Opaque credential; resolved from `<NAME>_API_KEY` when absent
    #[serde(default)]
    pub api_key: Option<String>,
    /// Lower rank is tried first; ties break by declaration order
    pub priority: u32,
    /// Flat per-job spend estimate, used by the budget gate and as the
    /// committed cost when the provider reports no token usage
    pub cost_per_job: f64,
    /// Price per 1M input tokens
    pub input_price_per_mtok: f64,
    /// Price per 1M output tokens
    pub output_price_per_mtok: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    /// Credential from config, else from the `<NAME>_API_KEY` env var
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        let var = format!("{}_API_KEY", self.name.to_uppercase().replace('-', "_"));
        std::env::var(var).ok()
    }
}

/// Configuration consumed by the router and batch coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub backends: Vec<BackendConfig>,
    /// Hard budget ceiling (currency units)
    pub budget_limit: f64,
    /// Worker pool size for the batch coordinator
    pub concurrency: usize,
    /// Retries per backend before failing over (AUTH never retries)
    pub max_retries: u32,
    /// Base backoff delay; doubles per retry
    pub retry_delay_ms: u64,
    /// Per-attempt deadline
    pub timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backends: vec![],
            budget_limit: 30_000.0,
            concurrency: 8,
            max_retries: 2,
            retry_delay_ms: 1000,
            timeout_ms: 30_000,
        }
    }
}

/// Default backend chain: cheapest first, premium last.
/// (name, model, endpoint, priority, cost/job, input ¥/M, output ¥/M)
const DEFAULT_BACKENDS: &[(&str, &str, &str, u32, f64, f64, f64)] = &[
    (
        "grok",
        "grok-4-1-fast",
        "https://api.x.ai/v1/chat/completions",
        1,
        30.0,
        30.0,
        76.0,
    ),
    (
        "gemini",
        "gemini-3-flash",
        "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        2,
        80.0,
        76.0,
        456.0,
    ),
    (
        "claude",
        "claude-sonnet-4-5",
        "https://api.anthropic.com/v1/chat/completions",
        3,
        300.0,
        456.0,
        2280.0,
    ),
];

impl RouterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let budget_limit = std::env::var("BUDGET_LIMIT")
            .unwrap_or_else(|_| "30000".to_string())
            .parse::<f64>()?;

        let concurrency = std::env::var("MAX_CONCURRENT")
            .unwrap_or_else(|_| "8".to_string())
            .parse::<usize>()?;

        let max_retries = std::env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u32>()?;

        let retry_delay_ms = std::env::var("RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()?;

        let timeout_ms = std::env::var("REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse::<u64>()?;

        Ok(Self {
            backends: vec![],
            budget_limit,
            concurrency,
            max_retries,
            retry_delay_ms,
            timeout_ms,
        })
    }

    /// Load configuration with the default backend chain
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::from_env()?;

        if config.backends.is_empty() {
            config.backends = DEFAULT_BACKENDS
                .iter()
                .map(
                    |(name, model, endpoint, priority, cost, input, output)| BackendConfig {
                        name: name.to_string(),
                        model: model.to_string(),
                        endpoint: endpoint.to_string(),
                        api_key: None,
                        priority: *priority,
                        cost_per_job: *cost,
                        input_price_per_mtok: *input,
                        output_price_per_mtok: *output,
                        enabled: true,
                    },
                )
                .collect();

            info!("Loaded {} default backends", config.backends.len());
        }

        Ok(config)
    }

    /// Load from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backends.is_empty() {
            return Err(anyhow::anyhow!("at least one backend is required"));
        }

        let mut names: Vec<&str> = self.backends.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.backends.len() {
            return Err(anyhow::anyhow!("backend names must be unique"));
        }

        for backend in &self.backends {
            if backend.endpoint.is_empty() {
                return Err(anyhow::anyhow!("backend {} has no endpoint", backend.name));
            }
            if backend.cost_per_job < 0.0 {
                return Err(anyhow::anyhow!(
                    "backend {} has negative cost_per_job",
                    backend.name
                ));
            }
        }

        if self.budget_limit < 0.0 {
            return Err(anyhow::anyhow!("budget_limit must not be negative"));
        }

        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("concurrency must be greater than 0"));
        }

        if self.timeout_ms == 0 {
            warn!("timeout_ms is 0; every attempt will time out immediately");
        }

        Ok(())
    }

    /// Backends in routing order: ascending priority, declaration order on ties
    pub fn ordered_backends(&self) -> Vec<&BackendConfig> {
        let mut ordered: Vec<&BackendConfig> = self.backends.iter().collect();
        // sort_by is stable, preserving declaration order for equal ranks
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority));
        ordered
    }

    /// Find backend by name
    pub fn find_backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}
