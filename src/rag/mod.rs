pub mod chunk;
pub mod embedder;
pub mod format;
pub mod index;
pub mod mmr;
pub mod prompt;
pub mod search;

pub use chunk::{Chunk, PageRef};
pub use embedder::{Embedder, OllamaEmbedder};
pub use format::{format_context, FormattedContext};
pub use index::{read_meta, write_index, IndexMeta, VectorIndex};
pub use prompt::{assemble_prompt, INSUFFICIENT_INFORMATION, SYSTEM_PROMPT};
pub use search::{dot_similarity, normalize, SearchResult, VectorStore};
