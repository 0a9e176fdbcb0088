//! Core data models for the translation router

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::errors::BackendErrorKind;

/// Catalog languages. Japanese is the fixed source language; the other
/// sixteen are valid translation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "es")]
    Spanish,
    /// Mexican Spanish
    #[serde(rename = "em")]
    SpanishMx,
    #[serde(rename = "pt")]
    Portuguese,
    #[serde(rename = "it")]
    Italian,
    #[serde(rename = "cz")]
    Czech,
    #[serde(rename = "pl")]
    Polish,
    #[serde(rename = "tk")]
    Turkish,
    #[serde(rename = "vi")]
    Vietnamese,
    #[serde(rename = "th")]
    Thai,
    #[serde(rename = "id")]
    Indonesian,
    #[serde(rename = "ko")]
    Korean,
    /// Simplified Chinese
    #[serde(rename = "cn")]
    ChineseCn,
    /// Traditional Chinese
    #[serde(rename = "tw")]
    ChineseTw,
}

impl Language {
    /// Two-letter catalog code
    pub fn code(&self) -> &'static str {
        match self {
            Language::Japanese => "ja",
            Language::English => "en",
            Language::German => "de",
            Language::French => "fr",
            Language::Spanish => "es",
            Language::SpanishMx => "em",
            Language::Portuguese => "pt",
            Language::Italian => "it",
            Language::Czech => "cz",
            Language::Polish => "pl",
            Language::Turkish => "tk",
            Language::Vietnamese => "vi",
            Language::Thai => "th",
            Language::Indonesian => "id",
            Language::Korean => "ko",
            Language::ChineseCn => "cn",
            Language::ChineseTw => "tw",
        }
    }

    /// English name, used in prompts
    pub fn english_name(&self) -> &'static str {
        match self {
            Language::Japanese => "Japanese",
            Language::English => "English",
            Language::German => "German",
            Language::French => "French",
            Language::Spanish => "Spanish",
            Language::SpanishMx => "Spanish (Mexico)",
            Language::Portuguese => "Portuguese",
            Language::Italian => "Italian",
            Language::Czech => "Czech",
            Language::Polish => "Polish",
            Language::Turkish => "Turkish",
            Language::Vietnamese => "Vietnamese",
            Language::Thai => "Thai",
            Language::Indonesian => "Indonesian",
            Language::Korean => "Korean",
            Language::ChineseCn => "Chinese (Simplified)",
            Language::ChineseTw => "Chinese (Traditional)",
        }
    }

    /// All valid target languages (everything except the Japanese source)
    pub fn all_targets() -> &'static [Language] {
        &[
            Language::English,
            Language::German,
            Language::French,
            Language::Spanish,
            Language::SpanishMx,
            Language::Portuguese,
            Language::Italian,
            Language::Czech,
            Language::Polish,
            Language::Turkish,
            Language::Vietnamese,
            Language::Thai,
            Language::Indonesian,
            Language::Korean,
            Language::ChineseCn,
            Language::ChineseTw,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ja" => Ok(Language::Japanese),
            "en" => Ok(Language::English),
            "de" => Ok(Language::German),
            "fr" => Ok(Language::French),
            "es" => Ok(Language::Spanish),
            "em" => Ok(Language::SpanishMx),
            "pt" => Ok(Language::Portuguese),
            "it" => Ok(Language::Italian),
            "cz" => Ok(Language::Czech),
            "pl" => Ok(Language::Polish),
            "tk" => Ok(Language::Turkish),
            "vi" => Ok(Language::Vietnamese),
            "th" => Ok(Language::Thai),
            "id" => Ok(Language::Indonesian),
            "ko" => Ok(Language::Korean),
            "cn" => Ok(Language::ChineseCn),
            "tw" => Ok(Language::ChineseTw),
            other => Err(format!("unknown language code: {}", other)),
        }
    }
}

/// A single atomic unit of work: one source text, one target language.
/// Created by the batch coordinator, consumed exactly once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationJob {
    pub id: String,
    pub source_text: String,
    pub source_language: Language,
    pub target_language: Language,
    pub requested_at: DateTime<Utc>,
}

impl TranslationJob {
    pub fn new(
        id: impl Into<String>,
        source_text: impl Into<String>,
        target_language: Language,
    ) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            source_language: Language::Japanese,
            target_language,
            requested_at: Utc::now(),
        }
    }

    pub fn with_source_language(mut self, source_language: Language) -> Self {
        self.source_language = source_language;
        self
    }
}

/// Outcome of one backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(BackendErrorKind),
}

/// One entry in a job's ordered attempt history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub backend: String,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn success(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            outcome: AttemptOutcome::Succeeded,
        }
    }

    pub fn failure(backend: impl Into<String>, kind: BackendErrorKind) -> Self {
        Self {
            backend: backend.into(),
            outcome: AttemptOutcome::Failed(kind),
        }
    }
}

/// Final product of the router for one job. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub job_id: String,
    pub translated_text: String,
    /// Name of the backend that produced the text (original backend for cache hits)
    pub backend_used: String,
    /// Cost committed for this job; zero for cache hits
    pub cost: f64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    /// Ordered backend attempt history; empty for cache hits
    pub attempts: Vec<AttemptRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_roundtrip() {
        for lang in Language::all_targets() {
            let parsed: Language = lang.code().parse().unwrap();
            assert_eq!(parsed, *lang);
        }
        assert_eq!("ja".parse::<Language>().unwrap(), Language::Japanese);
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serde_codes() {
        let json = serde_json::to_string(&Language::ChineseTw).unwrap();
        assert_eq!(json, "\"tw\"");
        let lang: Language = serde_json::from_str("\"em\"").unwrap();
        assert_eq!(lang, Language::SpanishMx);
    }

    #[test]
    fn test_sixteen_targets() {
        assert_eq!(Language::all_targets().len(), 16);
        assert!(!Language::all_targets().contains(&Language::Japanese));
    }

    #[test]
    fn test_job_defaults_to_japanese_source() {
        let job = TranslationJob::new("j1", "ショックキラー", Language::English);
        assert_eq!(job.source_language, Language::Japanese);
        assert_eq!(job.target_language, Language::English);
    }
}
