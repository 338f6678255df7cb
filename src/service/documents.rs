//! Document search over a local chunk index.
//!
//! [`LocalIndex`] keeps text chunks in a JSON file and ranks them by
//! term-frequency cosine distance. As with a vector store, lower scores are
//! better: `0.0` is a perfect match and `1.0` shares no terms with the query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub const CHUNK_SIZE: usize = 800;
pub const CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_TOP_K: usize = 3;

const INDEX_VERSION: u32 = 1;
const INGEST_EXTENSIONS: &[&str] = &["txt", "md"];

/// A stored piece of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub content: String,
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub content: String,
    pub source: String,
    /// Distance to the query; lower is better.
    pub score: f64,
}

/// Similarity search over stored chunks.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Up to `k` closest chunks, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>>;

    /// Number of stored chunks.
    async fn len(&self) -> usize;
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    chunks: Vec<Chunk>,
}

#[derive(Debug)]
struct Entry {
    chunk: Chunk,
    terms: HashMap<String, f64>,
    norm: f64,
}

impl Entry {
    fn new(chunk: Chunk) -> Self {
        let terms = term_frequencies(&chunk.content);
        let norm = norm(&terms);
        Self { chunk, terms, norm }
    }
}

/// JSON-file chunk index.
#[derive(Debug)]
pub struct LocalIndex {
    path: PathBuf,
    entries: RwLock<Vec<Entry>>,
}

impl LocalIndex {
    /// Load the index at `path`. A missing file is an empty index.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chunks = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: IndexFile = serde_json::from_slice(&bytes).map_err(|e| Error::Index {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                if file.version != INDEX_VERSION {
                    return Err(Error::Index {
                        path,
                        message: format!("unsupported index version {}", file.version),
                    });
                }
                file.chunks
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No document index at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                return Err(Error::Index {
                    path,
                    message: e.to_string(),
                })
            }
        };

        info!("Loaded {} chunk(s) from {}", chunks.len(), path.display());
        Ok(Self {
            path,
            entries: RwLock::new(chunks.into_iter().map(Entry::new).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunk every `.txt` and `.md` file under `dir`, add the new chunks
    /// and save. Returns how many chunks were added.
    pub async fn ingest_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref().to_path_buf();
        let documents = tokio::task::spawn_blocking(move || collect_documents(&dir))
            .await
            .map_err(|e| Error::Internal(format!("ingest task failed: {}", e)))??;

        let mut entries = self.entries.write().await;
        let mut known: HashSet<String> = entries.iter().map(|e| e.chunk.id.clone()).collect();
        let before = entries.len();

        for (source, text) in documents {
            let pieces = split_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
            debug!("{} -> {} chunk(s)", source, pieces.len());
            for content in pieces {
                let id = chunk_id(&source, &content);
                if known.insert(id.clone()) {
                    entries.push(Entry::new(Chunk {
                        id,
                        source: source.clone(),
                        content,
                    }));
                }
            }
        }

        let added = entries.len() - before;
        self.save(&entries).await?;
        info!("Ingested {} new chunk(s), {} total", added, entries.len());
        Ok(added)
    }

    async fn save(&self, entries: &[Entry]) -> Result<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            chunks: entries.iter().map(|e| e.chunk.clone()).collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| Error::Index {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl DocumentIndex for LocalIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>> {
        let query_terms = term_frequencies(query);
        let query_norm = norm(&query_terms);
        if query_norm == 0.0 || k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut hits: Vec<Hit> = entries
            .iter()
            .filter(|e| e.norm > 0.0)
            .filter_map(|e| {
                let dot: f64 = query_terms
                    .iter()
                    .filter_map(|(term, q)| e.terms.get(term).map(|d| q * d))
                    .sum();
                let similarity = dot / (query_norm * e.norm);
                (similarity > 0.0).then(|| Hit {
                    content: e.chunk.content.clone(),
                    source: e.chunk.source.clone(),
                    score: 1.0 - similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn collect_documents(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        return Err(Error::Index {
            path: dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Index {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        let wanted = entry.file_type().is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| INGEST_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !wanted {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => {
                documents.push((path.display().to_string(), text));
            }
            Ok(_) => debug!("Skipping empty {}", path.display()),
            Err(e) => warn!("Skipping unreadable {}: {}", path.display(), e),
        }
    }
    Ok(documents)
}

/// Split `text` into windows of at most `size` characters, each starting
/// `overlap` characters before the previous one ended. Cuts prefer
/// whitespace in the second half of a window.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            let floor = start + size / 2;
            if let Some(cut) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = cut + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

fn chunk_id(source: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
    {
        *terms.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

fn norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|v| v * v).sum::<f64>().sqrt()
}
