//! Build the local vector index from a CSV export of the assessment catalog.
//!
//! Usage: `index-catalog <catalog.csv> [output.json]`. The output defaults to
//! `APP_VECTOR_STORE`. The server only ever reads the resulting file.

use anyhow::{bail, Context, Result};
use assessment_recommender_api::{
    config::Config,
    services::{
        vector_index::{IndexFile, IndexRecord},
        EmbeddingModel, GeminiClient,
    },
};
use console::style;
use csv::ReaderBuilder;
use futures::future::BoxFuture;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Deserialize;
use std::{
    collections::HashSet,
    env,
    fs::File,
    path::{Path, PathBuf},
};
use tokio::time::{sleep, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BATCH_SIZE: usize = 25;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct CatalogCsvRecord {
    #[serde(alias = "Name", alias = "title", alias = "Title")]
    name: Option<String>,
    #[serde(alias = "URL", alias = "Url", alias = "link")]
    url: Option<String>,
    #[serde(alias = "Description")]
    description: Option<String>,
    #[serde(alias = "Test Type", alias = "test_types")]
    test_type: Option<String>,
    #[serde(alias = "Duration", alias = "assessment_length")]
    duration: Option<String>,
    #[serde(alias = "Remote Testing", alias = "remote_testing_support")]
    remote_testing: Option<String>,
    #[serde(alias = "Adaptive/IRT", alias = "adaptive_irt_support")]
    adaptive: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct CatalogEntry {
    id: String,
    name: String,
    text: String,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

/// Rich text representation used for the embedding and the prompt context
fn searchable_text(name: &str, record: &CatalogCsvRecord) -> String {
    let mut parts = vec![format!("Assessment: {}", name)];

    let fields = [
        ("Description", &record.description),
        ("Test type", &record.test_type),
        ("Duration", &record.duration),
        ("Remote testing", &record.remote_testing),
        ("Adaptive", &record.adaptive),
    ];
    for (label, value) in fields {
        if let Some(value) = clean(value.clone()) {
            parts.push(format!("{}: {}", label, value));
        }
    }

    parts.join(". ")
}

/// Stable id: the catalog URL when present, otherwise a slug of the name
fn entry_id(name: &str, url: Option<&str>) -> String {
    if let Some(url) = url {
        return url.to_string();
    }

    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    slug.split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Skip records without a name
fn validate_record(record: CatalogCsvRecord) -> Option<CatalogEntry> {
    let name = clean(record.name.clone())?;
    let url = clean(record.url.clone());
    let text = searchable_text(&name, &record);

    Some(CatalogEntry {
        id: entry_id(&name, url.as_deref()),
        name,
        text,
    })
}

fn read_catalog(csv_path: &Path) -> Result<Vec<CatalogEntry>> {
    let file = File::open(csv_path)
        .with_context(|| format!("Failed to open catalog {}", csv_path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut entries = Vec::new();
    let mut record_count = 0;
    let mut skipped_count = 0;

    for result in rdr.deserialize() {
        record_count += 1;
        let record: CatalogCsvRecord = match result {
            Ok(record) => record,
            Err(e) => {
                error!("Error parsing record {}: {}", record_count, e);
                skipped_count += 1;
                continue;
            }
        };

        match validate_record(record) {
            Some(entry) => entries.push(entry),
            None => skipped_count += 1,
        }
    }

    info!(
        "Parsed {} records, {} valid, {} skipped",
        record_count,
        entries.len(),
        skipped_count
    );

    Ok(dedupe(entries))
}

fn dedupe(mut entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut seen_ids = HashSet::new();
    entries.retain(|entry| seen_ids.insert(entry.id.clone()));
    entries
}

/// Retry operation with exponential backoff
async fn retry_with_backoff<'a, F, T>(
    operation: F,
    max_retries: u32,
    base_delay_ms: u64,
) -> Result<T>
where
    F: Fn() -> BoxFuture<'a, Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(e.context(format!("Operation failed after {} attempts", attempt)));
                }
                let delay = base_delay_ms * 2u64.pow(attempt - 1);
                warn!("Attempt {} failed, retrying in {}ms: {:#}", attempt, delay, e);
                sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

async fn index_catalog(embedder: &dyn EmbeddingModel, csv_path: &Path, output: &Path) -> Result<()> {
    info!("Reading catalog {}", csv_path.display());
    let entries = read_catalog(csv_path)?;
    if entries.is_empty() {
        bail!("No valid catalog entries found in {}", csv_path.display());
    }
    info!("{} unique catalog entries after deduplication", entries.len());

    let progress = ProgressBar::new(entries.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}")
            .progress_chars("##-"),
    );

    let total_batches = entries.len().div_ceil(BATCH_SIZE);
    let mut dimension: Option<usize> = None;
    let mut records = Vec::with_capacity(entries.len());
    let mut failed_batches = 0;

    for (batch_index, batch) in entries.chunks(BATCH_SIZE).enumerate() {
        let batch_num = batch_index + 1;
        let texts: Vec<String> = batch.iter().map(|e| e.text.clone()).collect();

        let embeddings = match retry_with_backoff(
            || embedder.embed_batch(&texts),
            MAX_RETRIES,
            RETRY_BASE_DELAY_MS,
        )
        .await
        {
            Ok(embeddings) => embeddings,
            Err(e) => {
                error!("Failed to embed batch {}/{}: {:#}", batch_num, total_batches, e);
                failed_batches += 1;
                progress.inc(batch.len() as u64);
                continue;
            }
        };

        let expected = *dimension.get_or_insert_with(|| embeddings.first().map_or(0, Vec::len));
        for (entry, embedding) in batch.iter().zip(embeddings) {
            if embedding.len() != expected || expected == 0 {
                warn!(
                    "Skipping {}: embedding dimension {} (expected {})",
                    entry.id,
                    embedding.len(),
                    expected
                );
                continue;
            }
            records.push(IndexRecord {
                id: entry.id.clone(),
                title: Some(entry.name.clone()),
                text: entry.text.clone(),
                embedding,
            });
        }

        progress.inc(batch.len() as u64);
        progress.set_message(format!("batch {}/{}", batch_num, total_batches));
    }
    progress.finish_with_message("done");

    let dimension = match dimension {
        Some(d) if d > 0 && !records.is_empty() => d,
        _ => bail!("No embeddings were produced, index not written"),
    };

    let indexed = records.len();
    IndexFile { dimension, records }.write_atomic(output)?;

    println!(
        "{} {} of {} entries (dimension {}) written to {}",
        style("Indexed").green().bold(),
        indexed,
        entries.len(),
        dimension,
        output.display()
    );
    if failed_batches > 0 {
        println!(
            "{} {} of {} batches failed; re-run to index the missing entries",
            style("Warning:").yellow().bold(),
            failed_batches,
            total_batches
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "index_catalog=info,assessment_recommender_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = env::args().skip(1);
    let csv_path = PathBuf::from(
        args.next()
            .context("Usage: index-catalog <catalog.csv> [output.json]")?,
    );

    let config = Config::load().context("Failed to load configuration")?;
    let output = match args.next() {
        Some(path) => PathBuf::from(path),
        None if !config.uses_remote_vector_store() => PathBuf::from(&config.vector_store),
        None => bail!("APP_VECTOR_STORE points at a remote index, pass an output path"),
    };

    let embedder = GeminiClient::new(&config).context("Failed to create embedding client")?;
    index_catalog(&embedder, &csv_path, &output).await
}
