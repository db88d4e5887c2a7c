//! Append-only flat L2 vector index with sidecar chunk metadata (C3).

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One retrieved/stored chunk of source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: usize,
    pub text: String,
    pub file_path: String,
    pub filename: String,
    pub chunk_index: usize,
}

/// A brute-force flat L2 index. Vectors and metadata are kept in lockstep:
/// `vectors[i]` corresponds to `metadata[i]` for every observable state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    dim: Option<usize>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from an initial batch of embeddings. `dim` is taken
    /// from the first vector.
    pub fn build(embeddings: Vec<Vec<f32>>, metadata: Vec<Chunk>) -> Result<Self> {
        let mut index = Self::new();
        index.add(embeddings, metadata)?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn metadata(&self) -> &[Chunk] {
        &self.metadata
    }

    /// Count of distinct `file_path`s currently indexed.
    pub fn distinct_file_count(&self) -> usize {
        let mut paths: Vec<&str> = self.metadata.iter().map(|c| c.file_path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths.len()
    }

    /// Append embeddings and their metadata. Asserts dimension match against
    /// any vectors already present.
    pub fn add(&mut self, embeddings: Vec<Vec<f32>>, metadata: Vec<Chunk>) -> Result<()> {
        if embeddings.len() != metadata.len() {
            return Err(PipelineError::Internal(format!(
                "embeddings/metadata length mismatch: {} vs {}",
                embeddings.len(),
                metadata.len()
            )));
        }
        for vector in &embeddings {
            match self.dim {
                None => self.dim = Some(vector.len()),
                Some(dim) if dim != vector.len() => {
                    return Err(PipelineError::Internal(format!(
                        "embedding dimension mismatch: index is {dim}, got {}",
                        vector.len()
                    )));
                }
                _ => {}
            }
        }
        self.vectors.extend(embeddings);
        self.metadata.extend(metadata);
        Ok(())
    }

    /// Search for the `top_k` nearest neighbours of `query` with similarity
    /// `>= min_similarity`. Fetches up to `3 * top_k` candidates before
    /// filtering, matching the corpus's search budget. Similarity is
    /// `1 / (1 + L2_distance)`; `min_similarity == 0.0` disables filtering
    /// entirely and returns exactly the top `top_k`.
    pub fn search(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Vec<(usize, f32, f32)> {
        if self.vectors.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let search_k = (top_k * 3).min(self.vectors.len());

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, l2_distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(search_k);

        let mut results = Vec::with_capacity(top_k);
        for (idx, dist) in scored {
            let similarity = 1.0 / (1.0 + dist);
            if min_similarity > 0.0 && similarity < min_similarity {
                continue;
            }
            results.push((idx, dist, similarity));
            if results.len() >= top_k {
                break;
            }
        }
        results
    }

    /// Write the binary index and its `.meta.json` sidecar. The sidecar is
    /// written after the index file, per the persistence contract.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bin = bincode_encode(self)?;
        std::fs::write(path, bin)?;

        let meta_path = meta_path_for(path);
        let meta_json = serde_json::to_vec_pretty(&self.metadata)?;
        std::fs::write(meta_path, meta_json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut index: VectorIndex = bincode_decode(&bytes)?;

        let meta_path = meta_path_for(path);
        if meta_path.exists() {
            let meta_bytes = std::fs::read(meta_path)?;
            index.metadata = serde_json::from_slice(&meta_bytes)?;
        }

        if index.vectors.len() != index.metadata.len() {
            return Err(PipelineError::Internal(format!(
                "loaded index has {} vectors but {} metadata entries",
                index.vectors.len(),
                index.metadata.len()
            )));
        }
        Ok(index)
    }
}

fn meta_path_for(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".meta.json");
    std::path::PathBuf::from(s)
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Index binary format is a self-contained JSON document (the persisted
/// artifact is opaque to callers per the external contract; JSON keeps the
/// on-disk layout simple to audit and doesn't require a binary dependency
/// beyond what the sidecar already uses).
fn bincode_encode(index: &VectorIndex) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(index)?)
}

fn bincode_decode(bytes: &[u8]) -> Result<VectorIndex> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_chunk(id: usize, path: &str) -> Chunk {
        Chunk {
            chunk_id: id,
            text: format!("chunk {id}"),
            file_path: path.to_string(),
            filename: path.to_string(),
            chunk_index: id,
        }
    }

    #[test]
    fn build_derives_dimension_from_first_vector() {
        let index = VectorIndex::build(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![sample_chunk(0, "a.rs"), sample_chunk(1, "b.rs")],
        )
        .unwrap();
        assert_eq!(index.dim(), Some(2));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn add_rejects_dimension_mismatch() {
        let mut index = VectorIndex::build(vec![vec![1.0, 0.0]], vec![sample_chunk(0, "a.rs")]).unwrap();
        let err = index.add(vec![vec![1.0, 0.0, 0.0]], vec![sample_chunk(1, "b.rs")]);
        assert!(err.is_err());
    }

    #[test]
    fn search_returns_closest_first() {
        let index = VectorIndex::build(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0]],
            vec![sample_chunk(0, "a.rs"), sample_chunk(1, "b.rs"), sample_chunk(2, "c.rs")],
        )
        .unwrap();
        let results = index.search(&[0.0, 0.0], 2, 0.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn zero_threshold_returns_exactly_top_k() {
        let index = VectorIndex::build(
            vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]],
            (0..4).map(|i| sample_chunk(i, "a.rs")).collect(),
        )
        .unwrap();
        let results = index.search(&[0.0], 2, 0.0);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo_123.index");
        let index = VectorIndex::build(
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![sample_chunk(0, "a.rs"), sample_chunk(1, "b.rs")],
        )
        .unwrap();
        index.save(&path).unwrap();

        assert!(path.exists());
        assert!(meta_path_for(&path).exists());

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.metadata(), index.metadata());
    }

    #[test]
    fn distinct_file_count_dedupes_paths() {
        let index = VectorIndex::build(
            vec![vec![1.0], vec![2.0], vec![3.0]],
            vec![sample_chunk(0, "a.rs"), sample_chunk(1, "a.rs"), sample_chunk(2, "b.rs")],
        )
        .unwrap();
        assert_eq!(index.distinct_file_count(), 2);
    }
}
