use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Failed to load vector index at {path}: {reason}")]
    IndexLoad { path: String, reason: String },
    #[error("Index write error: {0}")]
    IndexWrite(String),
    #[error("Embedding model '{model}' is unavailable: {detail}")]
    EmbeddingModel { model: String, detail: String },
    #[error(
        "Model backend unavailable at {endpoint}. Start the service (`ollama serve`) \
         and make sure model '{model}' is provisioned (`ollama pull {model}`). Details: {detail}"
    )]
    BackendUnavailable {
        endpoint: String,
        model: String,
        detail: String,
    },
    #[error("Validation error: {0}")]
    Validation(String),
}

impl RagError {
    pub(crate) fn index_load(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        RagError::IndexLoad {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl serde::Serialize for RagError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<RagError> for String {
    fn from(e: RagError) -> String {
        e.to_string()
    }
}

pub type RagResult<T> = Result<T, RagError>;
