use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::chunk::Chunk;
use crate::error::{RagError, RagResult};

pub(crate) const VECTORS_MAGIC: u32 = 0x52414756; // "RAGV"
pub(crate) const VECTORS_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
const INDEX_FILES: [&str; 3] = ["meta.json", "chunks.jsonl", "vectors.bin"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub version: u32,
    pub embedding_model: String,
    pub dimensions: u32,
    pub chunk_count: usize,
    pub file_count: usize,
    pub last_indexed: String,
}

impl IndexMeta {
    pub fn new(embedding_model: &str, dimensions: usize, chunks: &[Chunk]) -> Self {
        let files: HashSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        Self {
            version: VECTORS_VERSION,
            embedding_model: embedding_model.to_string(),
            dimensions: dimensions as u32,
            chunk_count: chunks.len(),
            file_count: files.len(),
            last_indexed: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// A loaded index: chunks plus a flat row-major matrix of normalized vectors.
/// Read-only after construction, so it can be shared across tasks without locking.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    chunks: Vec<Chunk>,
    vectors: Vec<f32>,
    dims: usize,
}

impl VectorIndex {
    /// Build an in-memory index. Chunk ids must equal their position.
    pub fn from_parts(meta: IndexMeta, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> RagResult<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::Validation(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(i) = vectors.iter().position(|v| v.len() != dims) {
            return Err(RagError::Validation(format!(
                "vector {i} has {} dims, expected {dims}",
                vectors[i].len()
            )));
        }
        if let Some(i) = chunks.iter().enumerate().position(|(i, c)| c.id != i) {
            return Err(RagError::Validation(format!(
                "chunk at position {i} has id {}",
                chunks[i].id
            )));
        }
        Ok(Self {
            meta,
            chunks,
            vectors: vectors.into_iter().flatten().collect(),
            dims,
        })
    }

    /// Load a persisted index. Missing or inconsistent files are fatal.
    pub fn load(index_dir: &Path) -> RagResult<Self> {
        if !index_dir.is_dir() {
            return Err(RagError::index_load(index_dir, "index directory not found"));
        }
        let _lock = acquire_shared_lock(index_dir)?;

        let meta = read_meta_unlocked(index_dir)?;
        let chunks = read_chunks(index_dir)?;
        let (dims, vectors) = read_vectors(index_dir)?;

        let count = if dims == 0 { 0 } else { vectors.len() / dims };
        if count != chunks.len() {
            return Err(RagError::index_load(
                index_dir,
                format!("vectors.bin holds {count} vectors but chunks.jsonl holds {} chunks", chunks.len()),
            ));
        }
        if meta.chunk_count != chunks.len() {
            return Err(RagError::index_load(
                index_dir,
                format!("meta.json declares {} chunks, found {}", meta.chunk_count, chunks.len()),
            ));
        }
        if count > 0 && meta.dimensions as usize != dims {
            return Err(RagError::index_load(
                index_dir,
                format!("meta.json declares {} dims, vectors.bin has {dims}", meta.dimensions),
            ));
        }
        if let Some(i) = chunks.iter().enumerate().position(|(i, c)| c.id != i) {
            return Err(RagError::index_load(
                index_dir,
                format!("chunk on line {} has id {}", i + 1, chunks[i].id),
            ));
        }

        tracing::info!(
            path = %index_dir.display(),
            chunks = chunks.len(),
            dims,
            model = %meta.embedding_model,
            "vector index loaded"
        );
        Ok(Self { meta, chunks, vectors, dims })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        if id >= self.chunks.len() {
            return None;
        }
        Some(&self.vectors[id * self.dims..(id + 1) * self.dims])
    }
}

/// Write index files atomically: meta.json, chunks.jsonl, vectors.bin.
/// Files are written to a temp directory and renamed into place under an
/// exclusive fs2 lock.
pub fn write_index(
    index_dir: &Path,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    meta: &IndexMeta,
) -> RagResult<()> {
    use fs2::FileExt;

    if chunks.len() != vectors.len() {
        return Err(RagError::IndexWrite(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }

    std::fs::create_dir_all(index_dir).map_err(|e| fail("create index dir", e))?;

    let lock_file = std::fs::File::create(index_dir.join(".lock"))
        .map_err(|e| fail("create lock file", e))?;
    lock_file.lock_exclusive().map_err(|e| fail("acquire lock", e))?;

    let staging = StagingDir(index_dir.join(format!(".tmp-{}", uuid::Uuid::new_v4())));
    let temp_dir = staging.0.as_path();
    std::fs::create_dir_all(temp_dir).map_err(|e| fail("create temp dir", e))?;

    // 1. meta.json
    let meta_json = serde_json::to_string_pretty(meta).map_err(|e| fail("serialize meta", e))?;
    std::fs::write(temp_dir.join("meta.json"), meta_json).map_err(|e| fail("write meta.json", e))?;

    // 2. chunks.jsonl
    let mut chunks_file = std::io::BufWriter::new(
        std::fs::File::create(temp_dir.join("chunks.jsonl"))
            .map_err(|e| fail("create chunks.jsonl", e))?,
    );
    for chunk in chunks {
        let line = serde_json::to_string(chunk).map_err(|e| fail("serialize chunk", e))?;
        writeln!(chunks_file, "{line}").map_err(|e| fail("write chunk", e))?;
    }
    chunks_file.flush().map_err(|e| fail("flush chunks.jsonl", e))?;

    // 3. vectors.bin: magic(u32) + version(u32) + dims(u32) + count(u32) + f32[]
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut buf = Vec::with_capacity(HEADER_LEN + dims * vectors.len() * 4);
    buf.extend_from_slice(&VECTORS_MAGIC.to_le_bytes());
    buf.extend_from_slice(&VECTORS_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dims as u32).to_le_bytes());
    buf.extend_from_slice(&(vectors.len() as u32).to_le_bytes());
    for (i, vec) in vectors.iter().enumerate() {
        if vec.len() != dims {
            return Err(RagError::IndexWrite(format!(
                "vector {i} has {} dims, expected {dims}",
                vec.len()
            )));
        }
        for &val in vec {
            buf.extend_from_slice(&val.to_le_bytes());
        }
    }
    std::fs::write(temp_dir.join("vectors.bin"), &buf).map_err(|e| fail("write vectors.bin", e))?;

    for file_name in INDEX_FILES {
        std::fs::rename(temp_dir.join(file_name), index_dir.join(file_name))
            .map_err(|e| fail(&format!("move {file_name}"), e))?;
    }
    drop(staging);
    let _ = lock_file.unlock();

    tracing::debug!(path = %index_dir.display(), chunks = chunks.len(), dims, "index written");
    Ok(())
}

/// Temp directory for `write_index`, removed on every exit path.
struct StagingDir(PathBuf);

impl Drop for StagingDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn fail(what: &str, e: impl std::fmt::Display) -> RagError {
    RagError::IndexWrite(format!("Failed to {what}: {e}"))
}

/// Read index metadata without loading chunks or vectors.
pub fn read_meta(index_dir: &Path) -> RagResult<IndexMeta> {
    let _lock = acquire_shared_lock(index_dir)?;
    read_meta_unlocked(index_dir)
}

/// Acquire a shared lock for reading. Returns the lock file handle.
fn acquire_shared_lock(index_dir: &Path) -> RagResult<Option<std::fs::File>> {
    use fs2::FileExt;
    let lock_path = index_dir.join(".lock");
    if !lock_path.exists() {
        return Ok(None);
    }
    let lock_file = std::fs::File::open(&lock_path)
        .map_err(|e| RagError::index_load(index_dir, format!("cannot open lock file: {e}")))?;
    lock_file
        .lock_shared()
        .map_err(|e| RagError::index_load(index_dir, format!("cannot acquire shared lock: {e}")))?;
    Ok(Some(lock_file))
}

fn read_meta_unlocked(index_dir: &Path) -> RagResult<IndexMeta> {
    let content = std::fs::read_to_string(index_dir.join("meta.json"))
        .map_err(|e| RagError::index_load(index_dir, format!("cannot read meta.json: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::index_load(index_dir, format!("cannot parse meta.json: {e}")))
}

fn read_chunks(index_dir: &Path) -> RagResult<Vec<Chunk>> {
    let file = std::fs::File::open(index_dir.join("chunks.jsonl"))
        .map_err(|e| RagError::index_load(index_dir, format!("cannot open chunks.jsonl: {e}")))?;
    let mut chunks = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .map_err(|e| RagError::index_load(index_dir, format!("cannot read chunks.jsonl: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
            RagError::index_load(index_dir, format!("bad chunk on line {}: {e}", n + 1))
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode vectors.bin into `(dims, flat values)`.
fn read_vectors(index_dir: &Path) -> RagResult<(usize, Vec<f32>)> {
    let path = index_dir.join("vectors.bin");
    let file = std::fs::File::open(&path)
        .map_err(|e| RagError::index_load(index_dir, format!("cannot open vectors.bin: {e}")))?;
    let file_len = file
        .metadata()
        .map_err(|e| RagError::index_load(index_dir, format!("cannot stat vectors.bin: {e}")))?
        .len() as usize;
    if file_len < HEADER_LEN {
        return Err(RagError::index_load(index_dir, "vectors.bin too small (no header)"));
    }

    // SAFETY: the file is held under a shared lock and writers only replace it by rename.
    let mmap = unsafe {
        memmap2::MmapOptions::new()
            .map(&file)
            .map_err(|e| RagError::index_load(index_dir, format!("cannot mmap vectors.bin: {e}")))?
    };

    let magic = read_u32(&mmap, 0);
    let version = read_u32(&mmap, 4);
    let dims = read_u32(&mmap, 8) as usize;
    let count = read_u32(&mmap, 12) as usize;

    if magic != VECTORS_MAGIC {
        return Err(RagError::index_load(
            index_dir,
            format!("invalid vectors.bin magic: {magic:#X} (expected {VECTORS_MAGIC:#X})"),
        ));
    }
    if version != VECTORS_VERSION {
        return Err(RagError::index_load(
            index_dir,
            format!("unsupported vectors.bin version: {version}"),
        ));
    }
    let expected_len = dims
        .checked_mul(count)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| {
            RagError::index_load(
                index_dir,
                format!("vectors.bin header overflows (dims={dims}, count={count})"),
            )
        })?;
    if file_len != expected_len {
        return Err(RagError::index_load(
            index_dir,
            format!("vectors.bin size mismatch: got {file_len}, expected {expected_len} (dims={dims}, count={count})"),
        ));
    }
    if count > 0 && dims == 0 {
        return Err(RagError::index_load(index_dir, "vectors.bin declares zero dimensions"));
    }

    let values: Vec<f32> = mmap[HEADER_LEN..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(RagError::index_load(index_dir, "vectors.bin contains non-finite values"));
    }
    Ok((dims, values))
}
