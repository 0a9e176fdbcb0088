//! CLI command definitions and handlers

use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::models::Language;

/// Commands for the translation router
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a catalog of phrases across target languages
    Run {
        /// Input catalog (JSON array of {id?, text, targets?})
        #[arg(short, long)]
        catalog: PathBuf,

        /// Glossary file (JSON array of {source_term, target_language, target_term})
        #[arg(short, long)]
        glossary: Option<PathBuf>,

        /// Output file for results and the run report (default: report.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target language codes, comma-separated (default: all sixteen)
        #[arg(short, long)]
        targets: Option<String>,

        /// Router configuration file (JSON); defaults to env + built-in chain
        #[arg(long)]
        config: Option<PathBuf>,

        /// Budget ceiling override
        #[arg(long)]
        budget: Option<f64>,

        /// Worker pool size override
        #[arg(long)]
        concurrency: Option<usize>,

        /// Translation memory file, loaded before and saved after the run
        #[arg(long)]
        memory: Option<PathBuf>,
    },

    /// Validate a glossary file and print a summary
    Glossary {
        /// Glossary file to check
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// One catalog entry as authored: a phrase plus optional per-entry targets
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    targets: Option<Vec<String>>,
}

/// Everything the run emits, written as one JSON document
#[derive(Debug, Serialize)]
struct RunOutput {
    report: crate::core::batch::RunReport,
    backends: Vec<BackendUsageLine>,
}

#[derive(Debug, Serialize)]
struct BackendUsageLine {
    name: String,
    attempts: u64,
    disabled: bool,
}

fn parse_targets(list: Option<&str>) -> anyhow::Result<Vec<Language>> {
    match list {
        None => Ok(Language::all_targets().to_vec()),
        Some(list) => list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|code| {
                code.parse::<Language>()
                    .map_err(|e| anyhow::anyhow!("invalid --targets: {}", e))
            })
            .collect(),
    }
}

/// Expand catalog entries into one job per (text, target language) pair
fn expand_jobs(
    entries: Vec<CatalogEntry>,
    default_targets: &[Language],
) -> anyhow::Result<Vec<crate::core::models::TranslationJob>> {
    use crate::core::models::TranslationJob;

    let mut jobs = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.text.trim().is_empty() {
            anyhow::bail!("catalog entry {} has empty text", index);
        }
        let item_id = entry.id.unwrap_or_else(|| format!("item-{}", index));
        let targets: Vec<Language> = match &entry.targets {
            Some(codes) => codes
                .iter()
                .map(|code| {
                    code.parse::<Language>().map_err(|e| {
                        anyhow::anyhow!("catalog entry {}: {}", item_id, e)
                    })
                })
                .collect::<anyhow::Result<_>>()?,
            None => default_targets.to_vec(),
        };
        for target in targets {
            jobs.push(TranslationJob::new(
                format!("{}:{}", item_id, target.code()),
                entry.text.clone(),
                target,
            ));
        }
    }
    Ok(jobs)
}

/// Handle the `run` command
#[allow(clippy::too_many_arguments)]
pub async fn handle_run(
    catalog: PathBuf,
    glossary: Option<PathBuf>,
    output: Option<PathBuf>,
    targets: Option<String>,
    config_file: Option<PathBuf>,
    budget: Option<f64>,
    concurrency: Option<usize>,
    memory: Option<PathBuf>,
) -> anyhow::Result<()> {
    use crate::core::batch::BatchCoordinator;
    use crate::core::config::RouterConfig;
    use crate::core::glossary::GlossaryStore;
    use crate::core::memory::TranslationMemory;
    use crate::core::router::FailoverRouter;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::Arc;
    use std::time::Instant;
    use tracing::info;

    let start_time = Instant::now();

    let mut config = match &config_file {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig::load()?,
    };
    if let Some(budget) = budget {
        config.budget_limit = budget;
    }
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;

    let glossary_store = match &glossary {
        Some(path) => GlossaryStore::load_from_file(path, 1)?,
        None => GlossaryStore::empty(),
    };
    let target_languages = parse_targets(targets.as_deref())?;

    info!("Input: {}", catalog.display());
    info!("Targets: {}", target_languages.len());
    info!("Glossary: {} term(s), v{}", glossary_store.len(), glossary_store.version());
    info!("Budget: {:.2}", config.budget_limit);

    let content = std::fs::read_to_string(&catalog)?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&content)?;
    if entries.is_empty() {
        anyhow::bail!("catalog is empty");
    }
    let jobs = expand_jobs(entries, &target_languages)?;

    let mut router = FailoverRouter::from_config(&config, glossary_store)?;
    if let Some(path) = &memory {
        let loaded = TranslationMemory::load_from_file(path)?;
        info!("Translation memory: {} cached entries", loaded.len().await);
        router = router.with_memory(Arc::new(loaded));
    }
    let router = Arc::new(router);

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("=>-"));

    let pb_clone = pb.clone();
    let coordinator = BatchCoordinator::new(Arc::clone(&router), config.concurrency)
        .with_progress(move |progress| {
            pb_clone.set_position(progress.completed as u64);
            pb_clone.set_message(format!("cost {:.2}", progress.cost_so_far));
        });

    let report = coordinator.run(jobs).await;
    pb.finish_with_message("done");

    if let Some(path) = &memory {
        router.memory().save_to_file(path).await?;
        info!("Translation memory saved to {}", path.display());
    }

    let backends = router
        .backend_stats()
        .into_iter()
        .map(|s| BackendUsageLine {
            name: s.name,
            attempts: s.attempts,
            disabled: s.disabled,
        })
        .collect();

    let output_path = output.unwrap_or_else(|| PathBuf::from("report.json"));
    let run_output = RunOutput { report, backends };
    std::fs::write(&output_path, serde_json::to_string_pretty(&run_output)?)?;

    println!("\n✅ Run completed in {:?}", start_time.elapsed());
    print!("{}", run_output.report.summary());
    println!("   Report: {}", output_path.display());

    if !run_output.report.failures.is_empty() {
        anyhow::bail!("{} job(s) failed", run_output.report.failures.len());
    }
    Ok(())
}

/// Handle the `glossary` command
pub async fn handle_glossary(file: PathBuf) -> anyhow::Result<()> {
    use crate::core::glossary::GlossaryStore;
    use std::collections::BTreeMap;

    let store = GlossaryStore::load_from_file(&file, 1)?;

    let mut per_language: BTreeMap<&str, usize> = BTreeMap::new();
    for target in Language::all_targets() {
        let count = store.entries_for(*target);
        if count > 0 {
            per_language.insert(target.code(), count);
        }
    }

    println!("✅ Glossary OK: {} term(s)", store.len());
    for (code, count) in per_language {
        println!("   {}: {} term(s)", code, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets_default_is_all_sixteen() {
        let targets = parse_targets(None).unwrap();
        assert_eq!(targets.len(), 16);
    }

    #[test]
    fn test_parse_targets_list() {
        let targets = parse_targets(Some("en, de,fr")).unwrap();
        assert_eq!(
            targets,
            vec![Language::English, Language::German, Language::French]
        );
        assert!(parse_targets(Some("en,xx")).is_err());
    }

    #[test]
    fn test_expand_jobs_one_per_pair() {
        let entries = vec![
            CatalogEntry {
                id: Some("SSD2".to_string()),
                text: "ショックキラー付きシリンダ".to_string(),
                targets: None,
            },
            CatalogEntry {
                id: None,
                text: "チューブ外径".to_string(),
                targets: Some(vec!["en".to_string(), "ko".to_string()]),
            },
        ];

        let jobs = expand_jobs(entries, &[Language::English, Language::German]).unwrap();
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[0].id, "SSD2:en");
        assert_eq!(jobs[1].id, "SSD2:de");
        assert_eq!(jobs[2].id, "item-1:en");
        assert_eq!(jobs[3].target_language, Language::Korean);
    }

    #[test]
    fn test_expand_jobs_rejects_empty_text() {
        let entries = vec![CatalogEntry {
            id: None,
            text: "   ".to_string(),
            targets: None,
        }];
        assert!(expand_jobs(entries, &[Language::English]).is_err());
    }
}
