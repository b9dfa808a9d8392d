//! Pre-computed prompt embeddings.
//!
//! The bank is an N×D matrix of L2-normalized text embeddings, one row per
//! prompt. It can be cached on disk as raw little-endian f32 with a `.meta`
//! sidecar recording a BLAKE3 hash of the prompts, so changing the vocabulary
//! or template invalidates the cache.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{ConfigError, DermaError, InferenceError};
use crate::math;

use super::TextEmbedder;

/// Normalized prompt embeddings, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptBank {
    matrix: Array2<f32>,
}

impl PromptBank {
    /// Build from per-prompt embeddings, L2-normalizing each row.
    ///
    /// All rows must share one non-zero dimension.
    pub fn from_embeddings(embeddings: Vec<Vec<f32>>) -> Result<Self, InferenceError> {
        let rows = embeddings.len();
        let dim = embeddings.first().map_or(0, Vec::len);
        if rows == 0 || dim == 0 {
            return Err(InferenceError::InvalidInput(
                "prompt bank needs at least one non-empty embedding".to_string(),
            ));
        }
        if let Some(i) = embeddings.iter().position(|e| e.len() != dim) {
            return Err(InferenceError::InvalidInput(format!(
                "prompt embedding {i} has dimension {}, expected {dim}",
                embeddings[i].len()
            )));
        }
        let flat: Vec<f32> = embeddings
            .iter()
            .flat_map(|e| math::l2_normalize(e))
            .collect();
        let matrix = Array2::from_shape_vec((rows, dim), flat)
            .map_err(|e| InferenceError::InvalidInput(format!("bad prompt bank shape: {e}")))?;
        Ok(Self { matrix })
    }

    /// Encode `prompts` in batches of `batch_size`.
    pub fn encode(
        prompts: &[String],
        encoder: &dyn TextEmbedder,
        batch_size: usize,
    ) -> Result<Self, InferenceError> {
        let mut embeddings = Vec::with_capacity(prompts.len());
        for chunk in prompts.chunks(batch_size.max(1)) {
            let batch = encoder.embed_texts(chunk)?;
            if batch.len() != chunk.len() {
                return Err(InferenceError::model(
                    "text-encoder",
                    format!("returned {} embeddings for {} prompts", batch.len(), chunk.len()),
                ));
            }
            embeddings.extend(batch);
        }
        let bank = Self::from_embeddings(embeddings)?;
        tracing::info!(
            "Encoded prompt bank: {} prompts x {} dims",
            bank.len(),
            bank.embedding_dim()
        );
        Ok(bank)
    }

    /// BLAKE3 hash of the prompts, in order.
    pub fn content_hash(prompts: &[String]) -> String {
        let mut hasher = blake3::Hasher::new();
        for prompt in prompts {
            hasher.update(prompt.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Save as raw f32 with a `.meta` sidecar.
    pub fn save(&self, path: &Path, prompt_hash: &str) -> Result<(), ConfigError> {
        let write_err = |e: std::io::Error| ConfigError::artifact(path, format!("cannot write prompt bank: {e}"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let bytes: Vec<u8> = self.matrix.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(path, &bytes).map_err(write_err)?;

        let meta = format!(
            "prompt_hash={}\nprompt_count={}\nembedding_dim={}\n",
            prompt_hash,
            self.len(),
            self.embedding_dim()
        );
        std::fs::write(path.with_extension("meta"), meta).map_err(write_err)?;

        tracing::info!(
            "Saved prompt bank to {:?} ({:.1} KB)",
            path,
            bytes.len() as f64 / 1_000.0
        );
        Ok(())
    }

    /// Load a bank saved by [`PromptBank::save`].
    pub fn load(path: &Path, prompt_count: usize, embedding_dim: usize) -> Result<Self, ConfigError> {
        let expected_len = prompt_count * embedding_dim * 4;
        let bytes = std::fs::read(path)
            .map_err(|e| ConfigError::artifact(path, format!("cannot read prompt bank: {e}")))?;
        if bytes.len() != expected_len {
            return Err(ConfigError::artifact(
                path,
                format!(
                    "prompt bank size mismatch: expected {} bytes ({} prompts), got {}",
                    expected_len,
                    prompt_count,
                    bytes.len()
                ),
            ));
        }
        let flat: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let matrix = Array2::from_shape_vec((prompt_count, embedding_dim), flat)
            .map_err(|e| ConfigError::artifact(path, e.to_string()))?;
        tracing::info!("Loaded prompt bank: {} prompts from {:?}", prompt_count, path);
        Ok(Self { matrix })
    }

    /// Whether the cache at `path` was built from prompts hashing to `prompt_hash`.
    pub fn cache_valid(path: &Path, prompt_hash: &str) -> bool {
        if !path.exists() {
            return false;
        }
        let Ok(content) = std::fs::read_to_string(path.with_extension("meta")) else {
            return false;
        };
        content
            .lines()
            .any(|line| line == format!("prompt_hash={prompt_hash}"))
    }

    /// Load from cache when valid, otherwise encode and refresh the cache.
    ///
    /// Cache problems are logged and never fatal. Encoder failures are, and so
    /// is an encoder whose output dimension differs from `embedding_dim`.
    pub fn load_or_encode(
        cache_path: &Path,
        prompts: &[String],
        encoder: &dyn TextEmbedder,
        batch_size: usize,
        embedding_dim: usize,
    ) -> Result<Self, DermaError> {
        let hash = Self::content_hash(prompts);
        if Self::cache_valid(cache_path, &hash) {
            match Self::load(cache_path, prompts.len(), embedding_dim) {
                Ok(bank) => return Ok(bank),
                Err(e) => tracing::warn!("Ignoring unreadable prompt bank cache: {e}"),
            }
        } else if cache_path.exists() {
            tracing::warn!("Prompt bank cache at {:?} is stale, rebuilding", cache_path);
        }

        let bank = Self::encode(prompts, encoder, batch_size)?;
        if bank.embedding_dim() != embedding_dim {
            return Err(ConfigError::ValidationError(format!(
                "open_set.embedding_dim is {embedding_dim} but the text encoder produces {}-dim embeddings",
                bank.embedding_dim()
            ))
            .into());
        }
        if let Err(e) = bank.save(cache_path, &hash) {
            tracing::warn!("Failed to write prompt bank cache: {e}");
        }
        Ok(bank)
    }

    /// Cosine similarity of a normalized embedding against every prompt.
    pub fn similarities(&self, embedding: &[f32]) -> Result<Vec<f64>, InferenceError> {
        if embedding.len() != self.embedding_dim() {
            return Err(InferenceError::InvalidInput(format!(
                "embedding has dimension {}, prompt bank expects {}",
                embedding.len(),
                self.embedding_dim()
            )));
        }
        let query: Array1<f32> = ArrayView1::from(embedding).to_owned();
        Ok(self.matrix.dot(&query).iter().map(|&s| s as f64).collect())
    }

    /// Stack another bank's rows below this one's.
    pub fn concat(&self, other: &PromptBank) -> Result<Self, InferenceError> {
        if self.embedding_dim() != other.embedding_dim() {
            return Err(InferenceError::InvalidInput(format!(
                "cannot join prompt banks: dimension mismatch ({} vs {})",
                self.embedding_dim(),
                other.embedding_dim()
            )));
        }
        let matrix = ndarray::concatenate(ndarray::Axis(0), &[self.matrix.view(), other.matrix.view()])
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        Ok(Self { matrix })
    }

    /// Number of prompts.
    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    /// Always false for a constructed bank.
    pub fn is_empty(&self) -> bool {
        self.matrix.nrows() == 0
    }

    /// Embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.matrix.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEncoder {
        calls: AtomicUsize,
    }

    impl TextEmbedder for CountingEncoder {
        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
    }

    fn prompts() -> Vec<String> {
        vec!["a".into(), "bb".into(), "ccc".into()]
    }

    #[test]
    fn test_rows_are_normalized() {
        let bank = PromptBank::from_embeddings(vec![vec![3.0, 4.0], vec![0.0, 2.0]]).unwrap();
        let sims = bank.similarities(&[0.0, 1.0]).unwrap();
        assert!((sims[0] - 0.8).abs() < 1e-6);
        assert!((sims[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_ragged_embeddings() {
        assert!(PromptBank::from_embeddings(vec![vec![1.0, 0.0], vec![1.0]]).is_err());
        assert!(PromptBank::from_embeddings(vec![]).is_err());
    }

    #[test]
    fn test_encode_batches_prompts() {
        let encoder = CountingEncoder { calls: AtomicUsize::new(0) };
        let bank = PromptBank::encode(&prompts(), &encoder, 2).unwrap();
        assert_eq!(bank.len(), 3);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.bin");
        let bank = PromptBank::from_embeddings(vec![vec![1.0, 2.0, 2.0], vec![0.0, 0.0, 1.0]]).unwrap();
        bank.save(&path, "abc").unwrap();
        assert!(PromptBank::cache_valid(&path, "abc"));
        assert!(!PromptBank::cache_valid(&path, "def"));
        assert_eq!(PromptBank::load(&path, 2, 3).unwrap(), bank);
        assert!(PromptBank::load(&path, 3, 3).is_err());
    }

    #[test]
    fn test_load_or_encode_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("prompts.bin");
        let encoder = CountingEncoder { calls: AtomicUsize::new(0) };

        let first = PromptBank::load_or_encode(&path, &prompts(), &encoder, 8, 3).unwrap();
        let second = PromptBank::load_or_encode(&path, &prompts(), &encoder, 8, 3).unwrap();
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);

        // A different prompt list invalidates the cache.
        let changed = vec!["a".to_string(), "bb".to_string()];
        PromptBank::load_or_encode(&path, &changed, &encoder, 8, 3).unwrap();
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_content_hash_is_order_sensitive() {
        let a = PromptBank::content_hash(&["x".into(), "y".into()]);
        let b = PromptBank::content_hash(&["y".into(), "x".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_concat() {
        let a = PromptBank::from_embeddings(vec![vec![1.0, 0.0]]).unwrap();
        let b = PromptBank::from_embeddings(vec![vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        assert_eq!(a.concat(&b).unwrap().len(), 3);
    }

    #[test]
    fn test_similarity_dimension_mismatch() {
        let bank = PromptBank::from_embeddings(vec![vec![1.0, 0.0]]).unwrap();
        assert!(bank.similarities(&[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_load_or_encode_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.bin");
        let encoder = CountingEncoder { calls: AtomicUsize::new(0) };

        let err = PromptBank::load_or_encode(&path, &prompts(), &encoder, 8, 512).unwrap_err();
        assert!(matches!(err, DermaError::Config(ConfigError::ValidationError(_))));
        assert!(err.to_string().contains("embedding_dim"));
        // Nothing is cached, so the next start re-checks instead of loading.
        assert!(!path.exists());
    }
}
