// ============================================
// PDF RAG - LOCAL DOCUMENT QUESTION ANSWERING
// Vector retrieval over a prebuilt index + Ollama generation
// ============================================

pub mod backend;
pub mod config;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod rag;

#[cfg(test)]
mod test_support;

pub use backend::{BackendConfig, BackendStatus};
pub use config::{GenerationSettings, PipelineConfig, RetrievalSettings};
pub use error::{RagError, RagResult};
pub use generator::{AnswerStream, Generator, OllamaGenerator};
pub use pipeline::{Answer, RagPipeline, StreamingAnswer};
