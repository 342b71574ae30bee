//! Similarity retrieval of few-shot exemplars.

use std::fmt::Write;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{LazyIndex, SearchHit};

/// Separator placed between exemplars in a prompt.
pub const EXEMPLAR_SEPARATOR: &str = "\n\n---\n\n";

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks to retrieve (default: 3).
    pub top_k: usize,
    /// Only this many leading characters of the input form the query (default: 500).
    pub query_chars: usize,
    /// Minimum cosine similarity to accept (default: 0.0).
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            query_chars: 500,
            score_threshold: 0.0,
        }
    }
}

/// Looks up stored chunks similar to a piece of code.
#[derive(Debug, Clone)]
pub struct CodeRetriever {
    index: Arc<LazyIndex>,
    config: RetrievalConfig,
}

impl CodeRetriever {
    #[must_use]
    pub fn new(index: Arc<LazyIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<LazyIndex> {
        &self.index
    }

    /// Top-k chunks similar to `code`, constructing the index on first use.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Unavailable` if the index cannot be constructed,
    /// or an embedding error if the query cannot be embedded.
    pub async fn retrieve(&self, code: &str) -> Result<Vec<SearchHit>> {
        let index = self.index.get().await?;
        let query = truncate_chars(code, self.config.query_chars);
        let hits = index.query(query, self.config.top_k).await?;
        let threshold = self.config.score_threshold;
        Ok(hits.into_iter().filter(|h| h.score >= threshold).collect())
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Render hits as exemplar blocks. Empty input renders as an empty string.
#[must_use]
pub fn format_as_exemplars(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            out.push_str(EXEMPLAR_SEPARATOR);
        }
        let chunk = &hit.chunk;
        let _ = writeln!(
            out,
            "# from {}/{} (lines {}-{})",
            chunk.repository, chunk.file_path, chunk.line_range.0, chunk.line_range.1
        );
        out.push_str(chunk.code.trim_end());
    }
    out
}
