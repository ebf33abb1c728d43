use crate::{
    config::Config,
    error::{ApiError, Result},
    models::{normalize_score, RetrievedFragment},
    services::pinecone::PineconeIndex,
};
use anyhow::{bail, Context};
use async_trait::async_trait;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};
use tracing::info;

/// Similarity search over precomputed catalog embeddings.
///
/// Implementations are opened once at startup and only read afterwards, so
/// they must tolerate concurrent `search` calls.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return at most `k` fragments ordered by descending score.
    async fn search(&self, vector: &[f32], k: usize) -> anyhow::Result<Vec<RetrievedFragment>>;
}

/// On-disk layout of the local index, written by `index-catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub dimension: usize,
    pub records: Vec<IndexRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl IndexFile {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open vector index {}", path.display()))?;
        let index: IndexFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse vector index {}", path.display()))?;

        if let Some(bad) = index
            .records
            .iter()
            .find(|r| r.embedding.len() != index.dimension)
        {
            bail!(
                "Record {} has dimension {}, index declares {}",
                bad.id,
                bad.embedding.len(),
                index.dimension
            );
        }

        Ok(index)
    }

    /// Write to a sibling temp file, then rename over `path`.
    pub fn write_atomic(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move index into {}", path.display()))?;
        Ok(())
    }
}

/// In-memory index loaded from an [`IndexFile`], searched by cosine similarity.
pub struct LocalVectorIndex {
    dimension: usize,
    records: Vec<IndexRecord>,
    norms: Vec<f32>,
}

impl LocalVectorIndex {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let index = IndexFile::read(path)?;
        info!(
            "Loaded local vector index {} ({} records, dimension {})",
            path.display(),
            index.records.len(),
            index.dimension
        );
        Ok(Self::from_file(index))
    }

    pub fn from_file(index: IndexFile) -> Self {
        let norms = index
            .records
            .iter()
            .map(|r| l2_norm(ArrayView1::from(&r.embedding[..])))
            .collect();
        Self {
            dimension: index.dimension,
            records: index.records,
            norms,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn l2_norm(v: ArrayView1<f32>) -> f32 {
    v.dot(&v).sqrt()
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn search(&self, vector: &[f32], k: usize) -> anyhow::Result<Vec<RetrievedFragment>> {
        if vector.len() != self.dimension {
            bail!(
                "Query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            );
        }
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(vector);
        let query_norm = l2_norm(query);

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (record, &norm))| {
                let cosine = if norm == 0.0 || query_norm == 0.0 {
                    0.0
                } else {
                    query.dot(&ArrayView1::from(&record.embedding[..])) / (norm * query_norm)
                };
                (i, normalize_score(cosine))
            })
            .collect();

        // Ties keep catalog order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let record = &self.records[i];
                RetrievedFragment {
                    text: record.text.clone(),
                    source_id: record.id.clone(),
                    title: record.title.clone(),
                    score,
                }
            })
            .collect())
    }
}

/// Open the configured vector store: a Pinecone host for `http(s)://`
/// locations, otherwise a local index file.
pub fn open_vector_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    if config.uses_remote_vector_store() {
        let api_key = config.vector_store_api_key.as_deref().ok_or_else(|| {
            ApiError::Config(
                "APP_VECTOR_STORE_API_KEY must be set for a remote vector store".to_string(),
            )
        })?;
        let index = PineconeIndex::new(&config.vector_store, api_key, config.request_timeout)?;
        return Ok(Arc::new(index));
    }

    let index = LocalVectorIndex::open(Path::new(&config.vector_store))
        .map_err(|e| ApiError::Config(format!("{:#}", e)))?;
    Ok(Arc::new(index))
}
