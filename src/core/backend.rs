//! Backend adapters: a uniform translate capability over provider APIs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::config::BackendConfig;
use crate::core::errors::{BackendError, BackendErrorKind};
use crate::core::glossary::TermConstraint;
use crate::core::models::Language;

/// One translation request as seen by an adapter
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub text: &'a str,
    pub source: Language,
    pub target: Language,
    /// Glossary mappings that must appear verbatim in the output
    pub constraints: &'a [TermConstraint],
}

/// Adapter output: the translated text plus the real cost of the call
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub text: String,
    pub cost: f64,
}

/// Uniform capability wrapping one external model provider. The router
/// depends only on this trait, never on a provider's wire shape.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short name used in attempt records and the cost ledger
    fn name(&self) -> &str;

    /// Translate one phrase. Errors are already mapped into the router's
    /// failure vocabulary.
    async fn translate(&self, request: &BackendRequest<'_>) -> Result<BackendReply, BackendError>;
}

// ---- OpenAI-compatible chat-completions adapter ----

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

/// Adapter for providers exposing an OpenAI-compatible chat API
/// (Grok, Gemini's compatibility endpoint, and similar).
#[derive(Debug)]
pub struct HttpBackend {
    config: BackendConfig,
    api_key: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, timeout: Duration) -> Result<Self, BackendError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            BackendError::new(
                BackendErrorKind::Auth,
                format!("no API key configured for backend {}", config.name),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| BackendError::new(BackendErrorKind::Unknown, e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// System prompt pinning the approved glossary renderings
    fn build_system_prompt(&self, request: &BackendRequest<'_>) -> String {
        let mut prompt = format!(
            "You are a professional technical translator for industrial catalogs.\n\n\
             REQUIREMENTS:\n\
             1. Translate {} to {}\n\
             2. Preserve all technical terminology exactly\n\
             3. Maintain original formatting\n\
             4. Output ONLY the translation, no explanations",
            request.source.english_name(),
            request.target.english_name(),
        );

        if !request.constraints.is_empty() {
            prompt.push_str("\n\nCRITICAL GLOSSARY TERMS (MUST USE EXACTLY):\n");
            for constraint in request.constraints {
                prompt.push_str(&format!(
                    "- {} = {}\n",
                    constraint.source_term, constraint.target_term
                ));
            }
        }

        prompt
    }

    /// Token-priced cost when the provider reports usage, otherwise the
    /// flat per-job estimate
    fn cost_for(&self, usage: Option<&ChatUsage>) -> f64 {
        match usage {
            Some(usage) => {
                let input = usage.prompt_tokens as f64 / 1_000_000.0
                    * self.config.input_price_per_mtok;
                let output = usage.completion_tokens as f64 / 1_000_000.0
                    * self.config.output_price_per_mtok;
                input + output
            }
            None => self.config.cost_per_job,
        }
    }

    fn map_send_error(err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::new(BackendErrorKind::Timeout, err.to_string())
        } else {
            BackendError::new(BackendErrorKind::Unknown, err.to_string())
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn translate(&self, request: &BackendRequest<'_>) -> Result<BackendReply, BackendError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.build_system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Translate this {} technical text to {}:\n\n{}",
                        request.source.english_name(),
                        request.target.english_name(),
                        request.text
                    ),
                },
            ],
            temperature: 0.1,
        };

        debug!(
            "Calling {} for {} -> {}",
            self.config.name, request.source, request.target
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let kind = match status.as_u16() {
                429 => BackendErrorKind::RateLimit,
                401 | 403 => BackendErrorKind::Auth,
                _ => BackendErrorKind::Unknown,
            };
            return Err(BackendError::new(
                kind,
                format!("{} returned {}: {}", self.config.name, status, message),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            BackendError::new(BackendErrorKind::MalformedResponse, e.to_string())
        })?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::MalformedResponse,
                    "no translation in response",
                )
            })?;

        Ok(BackendReply {
            text,
            cost: self.cost_for(parsed.usage.as_ref()),
        })
    }
}
