use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::BackendConfig;
use crate::error::{RagError, RagResult};

pub const DEFAULT_MODEL: &str = "phi3:mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
pub const DEFAULT_INDEX_DIR: &str = "data/index";

/// Sampling temperature sent with every generation request.
pub const TEMPERATURE: f32 = 0.0;

const MIN_FETCH_K: usize = 20;
const FETCH_K_MULTIPLIER: usize = 4;

/// How chunks are selected for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalSettings {
    pub k: usize,
    pub use_diversity: bool,
    /// Candidate pool for diversity re-ranking. `None` means `max(4k, 20)`.
    pub fetch_k: Option<usize>,
    pub snippet_chars: usize,
    /// 1.0 = pure relevance, 0.0 = pure diversity.
    pub mmr_lambda: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 3,
            use_diversity: true,
            fetch_k: None,
            snippet_chars: 400,
            mmr_lambda: 0.5,
        }
    }
}

impl RetrievalSettings {
    pub fn effective_fetch_k(&self) -> usize {
        self.fetch_k
            .unwrap_or_else(|| (self.k * FETCH_K_MULTIPLIER).max(MIN_FETCH_K))
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.k == 0 {
            return Err(RagError::Validation("k must be at least 1".into()));
        }
        if self.snippet_chars == 0 {
            return Err(RagError::Validation("snippet_chars must be at least 1".into()));
        }
        if let Some(fetch_k) = self.fetch_k {
            if fetch_k < self.k {
                return Err(RagError::Validation(format!(
                    "fetch_k ({fetch_k}) must be >= k ({})",
                    self.k
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(RagError::Validation(format!(
                "mmr_lambda must be within [0, 1], got {}",
                self.mmr_lambda
            )));
        }
        Ok(())
    }
}

/// Options forwarded to the generation backend. Temperature is pinned to [`TEMPERATURE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub model: String,
    pub num_ctx: u32,
    pub num_predict: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            num_ctx: 2048,
            num_predict: 256,
        }
    }
}

impl GenerationSettings {
    pub fn temperature(&self) -> f32 {
        TEMPERATURE
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.model.trim().is_empty() {
            return Err(RagError::Validation("model must not be empty".into()));
        }
        if self.num_ctx == 0 || self.num_predict == 0 {
            return Err(RagError::Validation(
                "num_ctx and num_predict must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to open a pipeline. Changing any field means opening a new one.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub index_dir: PathBuf,
    pub embedding_model: String,
    pub backend: BackendConfig,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            backend: BackendConfig::default(),
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}
