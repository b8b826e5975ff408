use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::config::{PipelineConfig, RetrievalSettings};
use crate::error::{RagError, RagResult};
use crate::generator::{AnswerStream, Generator, OllamaGenerator};
use crate::rag::{assemble_prompt, format_context, Embedder, OllamaEmbedder, SearchResult, VectorIndex, VectorStore};

/// Blocking answer with the citations of the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Streaming answer. `sources` is known before the first fragment arrives.
pub struct StreamingAnswer {
    pub stream: AnswerStream,
    pub sources: Vec<String>,
}

impl std::fmt::Debug for StreamingAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingAnswer")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

/// Question -> retrieval -> context -> prompt -> generation.
///
/// Immutable once built. Clones share the index, embedder and generator.
#[derive(Clone)]
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalSettings,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        retrieval: RetrievalSettings,
    ) -> RagResult<Self> {
        retrieval.validate()?;
        if !store.is_empty() && store.dimensions() != embedder.dimensions() {
            return Err(RagError::Validation(format!(
                "embedding model '{}' produces {}-dimensional vectors but the index holds {}-dimensional vectors",
                embedder.model(),
                embedder.dimensions(),
                store.dimensions()
            )));
        }
        Ok(Self { embedder, store, generator, retrieval })
    }

    /// Load the index, resolve the embedding model and prepare the generator.
    /// Any failure aborts construction.
    pub async fn open(config: &PipelineConfig) -> RagResult<Self> {
        config.retrieval.validate()?;
        let index = VectorIndex::load(&config.index_dir)?;
        if !index.is_empty() && index.meta().embedding_model != config.embedding_model {
            tracing::warn!(
                index_model = %index.meta().embedding_model,
                configured = %config.embedding_model,
                "index was built with a different embedding model"
            );
        }
        let embedder = OllamaEmbedder::connect(&config.backend, &config.embedding_model).await?;
        let generator = OllamaGenerator::new(&config.backend, config.generation.clone())?;

        tracing::info!(
            index = %config.index_dir.display(),
            chunks = index.len(),
            model = %config.generation.model,
            endpoint = %generator.endpoint(),
            "pipeline ready"
        );
        Self::new(
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(generator),
            config.retrieval.clone(),
        )
    }

    pub fn retrieval(&self) -> &RetrievalSettings {
        &self.retrieval
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    /// Ranked chunks for `question` under the configured strategy.
    pub async fn retrieve(&self, question: &str) -> RagResult<Vec<SearchResult>> {
        let query = self.embedder.embed_query(question).await?;
        let r = &self.retrieval;
        let results = if r.use_diversity {
            self.store
                .diversity_search(&query, r.k, r.effective_fetch_k(), r.mmr_lambda)?
        } else {
            self.store.similarity_search(&query, r.k)?
        };
        tracing::debug!(
            diversity = r.use_diversity,
            k = r.k,
            hits = results.len(),
            "retrieved chunks"
        );
        Ok(results)
    }

    /// Retrieval and formatting, everything before the backend call.
    async fn prepare(&self, question: &str) -> RagResult<(String, Vec<String>)> {
        let results = self.retrieve(question).await?;
        let context = format_context(results.iter().map(|r| &r.chunk), self.retrieval.snippet_chars);
        Ok((assemble_prompt(question, &context.text), context.citations))
    }

    pub async fn answer_question(&self, question: &str) -> RagResult<Answer> {
        let (prompt, sources) = self.prepare(question).await?;
        let answer = self.generator.answer(&prompt).await?;
        Ok(Answer { answer, sources })
    }

    /// Like [`answer_question`](Self::answer_question) but yields fragments as they
    /// are produced. Only retrieval failures return `Err`; once sources are known
    /// every generation failure, including a refused request, arrives as the
    /// stream's last item.
    pub async fn stream_question(&self, question: &str) -> RagResult<StreamingAnswer> {
        let (prompt, sources) = self.prepare(question).await?;
        let stream = match self.generator.stream_answer(&prompt).await {
            Ok(stream) => stream,
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        };
        Ok(StreamingAnswer { stream, sources })
    }
}
