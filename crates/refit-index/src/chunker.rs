//! Structure-aware chunking: tree-sitter boundaries first, recursive size-based fallback.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use tree_sitter::Parser;

use crate::languages::{Lang, detect_language};

/// Fallback separators tried in order before splitting between characters.
const SEPARATORS: &[&str] = &["\n\n", "\n"];

const FALLBACK_NODE_TYPE: &str = "fallback";

/// One chunk of source code tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub code: String,
    pub repository: String,
    pub file_path: String,
    /// Position of this chunk within its file.
    pub index: usize,
    pub language: Option<Lang>,
    pub node_type: String,
    /// Byte span of `code` within the original file.
    pub byte_range: (usize, usize),
    /// Leading bytes of `code` repeated from the previous chunk.
    pub overlap: usize,
    /// 1-based inclusive line span.
    pub line_range: (usize, usize),
    pub content_hash: String,
}

impl CodeChunk {
    /// The part of this chunk not shared with its predecessor.
    #[must_use]
    pub fn fresh_text(&self) -> &str {
        self.code.get(self.overlap..).unwrap_or_default()
    }

    /// Stable identity derived from origin, position, and content.
    #[must_use]
    pub fn record_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.repository.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.file_path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.index.to_le_bytes());
        hasher.update(self.content_hash.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Chunk size budget, measured in characters.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Hard upper bound on chunk length (default: 1000).
    pub max_chars: usize,
    /// Characters repeated between consecutive size-based chunks (default: 100).
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap: 100,
        }
    }
}

/// Where a file came from and how to parse it.
#[derive(Debug, Clone, Copy)]
pub struct SplitHints<'a> {
    pub repository: &'a str,
    pub file_path: &'a str,
    pub language: Option<Lang>,
}

impl<'a> SplitHints<'a> {
    /// Hints with the language detected from the file extension.
    #[must_use]
    pub fn for_file(repository: &'a str, file_path: &'a str) -> Self {
        Self {
            repository,
            file_path,
            language: detect_language(std::path::Path::new(file_path)),
        }
    }
}

#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    overlap: usize,
    node_type: String,
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

struct Unit {
    range: Range<usize>,
    kind: Option<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkSplitter {
    config: ChunkerConfig,
}

impl ChunkSplitter {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. The returned iterator is cheap to clone;
    /// each clone replays the same sequence from the start.
    #[must_use]
    pub fn split<'a>(&self, text: &'a str, hints: &SplitHints<'a>) -> Chunks<'a> {
        let spans = if text.is_empty() {
            Vec::new()
        } else if let Some(units) = hints.language.and_then(|lang| structural_units(text, lang)) {
            self.pack_units(text, &units)
        } else {
            self.fallback(text, 0..text.len())
        };

        let newlines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();
        Chunks {
            source: text,
            repository: hints.repository,
            file_path: hints.file_path,
            language: hints.language,
            spans: spans.into(),
            newlines: newlines.into(),
            next: 0,
        }
    }

    fn pack_units(&self, text: &str, units: &[Unit]) -> Vec<Span> {
        let max = self.config.max_chars.max(1);
        let mut spans = Vec::new();
        let mut batch: Vec<&Unit> = Vec::new();
        let mut batch_chars = 0usize;

        for unit in units {
            let chars = text[unit.range.clone()].chars().count();

            if chars > max {
                flush_batch(&mut batch, &mut spans);
                batch_chars = 0;
                spans.extend(self.fallback(text, unit.range.clone()));
                continue;
            }

            if batch_chars + chars > max && !batch.is_empty() {
                flush_batch(&mut batch, &mut spans);
                batch_chars = 0;
            }
            batch.push(unit);
            batch_chars += chars;
        }
        flush_batch(&mut batch, &mut spans);
        spans
    }

    fn fallback(&self, text: &str, range: Range<usize>) -> Vec<Span> {
        let max = self.config.max_chars.max(1);
        let mut pieces = Vec::new();
        split_pieces(text, range, SEPARATORS, max, &mut pieces);
        merge_pieces(&pieces, max, self.config.overlap)
    }
}

fn flush_batch(batch: &mut Vec<&Unit>, spans: &mut Vec<Span>) {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return;
    };
    let kinds: Vec<&str> = batch.iter().filter_map(|u| u.kind).collect();
    let node_type = match kinds.as_slice() {
        [] => "module".to_owned(),
        [kind] => (*kind).to_owned(),
        [kind, ..] => format!("{kind}x{}", kinds.len()),
    };
    spans.push(Span {
        start: first.range.start,
        end: last.range.end,
        overlap: 0,
        node_type,
    });
    batch.clear();
}

/// Cover `text` with contiguous units: one per top-level entity node plus the gaps between them.
fn structural_units(text: &str, lang: Lang) -> Option<Vec<Unit>> {
    let grammar = lang.grammar()?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(text, None)?;
    let root = tree.root_node();

    let mut units = Vec::new();
    let mut cursor = 0usize;
    let mut cursor_walk = root.walk();
    for child in root.named_children(&mut cursor_walk) {
        let start = child.start_byte().max(cursor);
        let end = child.end_byte().clamp(start, text.len());
        if !lang.is_entity(child.kind()) {
            continue;
        }
        if start > cursor {
            units.push(Unit {
                range: cursor..start,
                kind: None,
            });
        }
        if end > start {
            units.push(Unit {
                range: start..end,
                kind: Some(child.kind()),
            });
        }
        cursor = end;
    }

    if units.is_empty() {
        return None;
    }
    if cursor < text.len() {
        units.push(Unit {
            range: cursor..text.len(),
            kind: None,
        });
    }
    Some(units)
}

/// Break `range` into pieces no longer than `max` chars, trying coarser separators first.
/// Separators stay attached to the piece they terminate.
fn split_pieces(
    text: &str,
    range: Range<usize>,
    separators: &[&str],
    max: usize,
    out: &mut Vec<Piece>,
) {
    let slice = &text[range.clone()];
    let chars = slice.chars().count();
    if chars <= max {
        if !slice.is_empty() {
            out.push(Piece {
                start: range.start,
                end: range.end,
                chars,
            });
        }
        return;
    }

    let Some((sep, rest)) = separators.split_first() else {
        for (offset, c) in slice.char_indices() {
            let start = range.start + offset;
            out.push(Piece {
                start,
                end: start + c.len_utf8(),
                chars: 1,
            });
        }
        return;
    };

    let mut piece_start = 0usize;
    for (idx, matched) in slice.match_indices(sep) {
        let piece_end = idx + matched.len();
        split_pieces(
            text,
            range.start + piece_start..range.start + piece_end,
            rest,
            max,
            out,
        );
        piece_start = piece_end;
    }
    if piece_start < slice.len() {
        split_pieces(text, range.start + piece_start..range.end, rest, max, out);
    }
}

/// Greedily merge pieces into spans of at most `max` chars, carrying up to
/// `overlap` chars of trailing pieces into the next span.
fn merge_pieces(pieces: &[Piece], max: usize, overlap: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0usize;
    let mut carried = 0usize;

    for piece in pieces {
        if total + piece.chars > max && !window.is_empty() {
            push_window(&window, carried, &mut spans);
            while total > 0 && (total > overlap || total + piece.chars > max) {
                if let Some(dropped) = window.pop_front() {
                    total -= dropped.chars;
                }
            }
            carried = window.len();
        }
        window.push_back(*piece);
        total += piece.chars;
    }
    push_window(&window, carried, &mut spans);
    spans
}

fn push_window(window: &VecDeque<Piece>, carried: usize, spans: &mut Vec<Span>) {
    if window.len() <= carried {
        return;
    }
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return;
    };
    let overlap = window
        .get(carried)
        .map_or(0, |fresh| fresh.start - first.start);
    spans.push(Span {
        start: first.start,
        end: last.end,
        overlap,
        node_type: FALLBACK_NODE_TYPE.to_owned(),
    });
}

/// Lazily materialized chunk sequence produced by [`ChunkSplitter::split`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    source: &'a str,
    repository: &'a str,
    file_path: &'a str,
    language: Option<Lang>,
    spans: Arc<[Span]>,
    newlines: Arc<[usize]>,
    next: usize,
}

impl Chunks<'_> {
    fn line_of(&self, byte: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < byte) + 1
    }
}

impl Iterator for Chunks<'_> {
    type Item = CodeChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.spans.get(self.next)?;
        let index = self.next;
        self.next += 1;

        let code = &self.source[span.start..span.end];
        let last_byte = span.end.saturating_sub(1).max(span.start);
        Some(CodeChunk {
            code: code.to_owned(),
            repository: self.repository.to_owned(),
            file_path: self.file_path.to_owned(),
            index,
            language: self.language,
            node_type: span.node_type.clone(),
            byte_range: (span.start, span.end),
            overlap: span.overlap,
            line_range: (self.line_of(span.start), self.line_of(last_byte)),
            content_hash: blake3::hash(code.as_bytes()).to_hex().to_string(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.spans.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn splitter(max_chars: usize, overlap: usize) -> ChunkSplitter {
        ChunkSplitter::new(ChunkerConfig { max_chars, overlap })
    }

    fn plain<'a>() -> SplitHints<'a> {
        SplitHints {
            repository: "octo/repo",
            file_path: "notes.txt",
            language: None,
        }
    }

    fn reconstruct(chunks: &[CodeChunk]) -> String {
        chunks.iter().map(CodeChunk::fresh_text).collect()
    }

    const PY_SOURCE: &str = "import os\n\n\ndef alpha(x):\n    return x + 1\n\n\nclass Beta:\n    def run(self):\n        return os.getcwd()\n\n\n@cache\ndef gamma(y):\n    return y * 2\n";

    #[test]
    fn empty_input_yields_no_chunks() {
        assert_eq!(splitter(100, 10).split("", &plain()).count(), 0);
    }

    #[test]
    fn small_input_is_one_chunk() {
        let chunks: Vec<_> = splitter(100, 10).split("x = 1\n", &plain()).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].code, "x = 1\n");
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[0].line_range, (1, 1));
    }

    #[test]
    fn chunks_are_tagged_with_origin_and_sequence() {
        let text = "line one\n".repeat(30);
        let chunks: Vec<_> = splitter(40, 10).split(&text, &plain()).collect();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.repository, "octo/repo");
            assert_eq!(chunk.file_path, "notes.txt");
            assert_eq!(chunk.node_type, "fallback");
        }
    }

    #[test]
    fn fallback_prefers_blank_lines() {
        let text = "aaaa\naaaa\n\nbbbb\nbbbb\n\ncccc\ncccc\n";
        let chunks: Vec<_> = splitter(12, 0).split(text, &plain()).collect();
        assert_eq!(chunks[0].code, "aaaa\naaaa\n\n");
        assert_eq!(chunks[1].code, "bbbb\nbbbb\n\n");
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn fallback_applies_overlap() {
        let text = "0123456789\n".repeat(10);
        let chunks: Vec<_> = splitter(33, 11).split(&text, &plain()).collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].overlap, 0);
        assert!(chunks[1..].iter().all(|c| c.overlap == 11));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn unbroken_text_is_hard_split_with_overlap() {
        let text = "x".repeat(250);
        let chunks: Vec<_> = splitter(100, 20).split(&text, &plain()).collect();
        assert!(chunks.iter().all(|c| c.code.chars().count() <= 100));
        assert!(chunks[1..].iter().all(|c| c.overlap == 20));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn multibyte_text_respects_char_budget() {
        let text = "héllo wörld ✓ ".repeat(20);
        let chunks: Vec<_> = splitter(17, 4).split(&text, &plain()).collect();
        assert!(chunks.iter().all(|c| c.code.chars().count() <= 17));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn line_ranges_follow_byte_ranges() {
        let text = "a\nb\nc\nd\n";
        let chunks: Vec<_> = splitter(4, 0).split(text, &plain()).collect();
        assert_eq!(chunks[0].line_range, (1, 2));
        assert_eq!(chunks[1].line_range, (3, 4));
    }

    #[test]
    fn iterator_is_restartable_by_clone() {
        let text = "word ".repeat(100);
        let chunks = splitter(50, 5).split(&text, &plain());
        let again = chunks.clone();
        assert_eq!(chunks.len(), again.len());
        assert_eq!(chunks.collect::<Vec<_>>(), again.collect::<Vec<_>>());
    }

    #[test]
    fn record_id_is_stable_and_position_sensitive() {
        let text = "a\n".repeat(40);
        let chunks: Vec<_> = splitter(10, 0).split(&text, &plain()).collect();
        let replay: Vec<_> = splitter(10, 0).split(&text, &plain()).collect();
        assert_eq!(chunks[0].record_id(), replay[0].record_id());
        assert_ne!(chunks[0].record_id(), chunks[1].record_id());
    }

    #[cfg(feature = "lang-python")]
    mod python {
        use super::*;

        fn py<'a>() -> SplitHints<'a> {
            SplitHints::for_file("octo/repo", "pkg/mod.py")
        }

        #[test]
        fn for_file_detects_language() {
            assert_eq!(py().language, Some(Lang::Python));
        }

        #[test]
        fn whole_file_fits_in_one_structural_chunk() {
            let chunks: Vec<_> = splitter(1000, 100).split(PY_SOURCE, &py()).collect();
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].code, PY_SOURCE);
            assert_eq!(chunks[0].overlap, 0);
        }

        #[test]
        fn structural_units_are_never_split() {
            let chunks: Vec<_> = splitter(60, 10).split(PY_SOURCE, &py()).collect();
            for unit in [
                "def alpha(x):\n    return x + 1",
                "class Beta:\n    def run(self):\n        return os.getcwd()",
                "@cache\ndef gamma(y):\n    return y * 2",
            ] {
                let holders = chunks.iter().filter(|c| c.code.contains(unit)).count();
                assert_eq!(holders, 1, "unit split or duplicated: {unit}");
            }
            assert!(chunks.iter().all(|c| c.overlap == 0));
            assert!(chunks.iter().all(|c| c.code.chars().count() <= 60));
            assert_eq!(reconstruct(&chunks), PY_SOURCE);
        }

        #[test]
        fn structural_chunks_report_node_kind() {
            let chunks: Vec<_> = splitter(60, 10).split(PY_SOURCE, &py()).collect();
            assert!(
                chunks
                    .iter()
                    .any(|c| c.node_type.starts_with("class_definition"))
            );
            assert!(
                chunks
                    .iter()
                    .any(|c| c.node_type.starts_with("decorated_definition"))
            );
        }

        #[test]
        fn oversized_function_falls_back_with_overlap() {
            let body: String = (0..40).map(|i| format!("    v{i} = {i}\n")).collect();
            let source = format!("def big():\n{body}    return 0\n\n\ndef small():\n    pass\n");
            let chunks: Vec<_> = splitter(120, 20).split(&source, &py()).collect();
            assert!(chunks.iter().any(|c| c.node_type == "fallback" && c.overlap > 0));
            assert_eq!(
                chunks
                    .iter()
                    .filter(|c| c.code.contains("def small():\n    pass"))
                    .count(),
                1
            );
            assert!(chunks.iter().all(|c| c.code.chars().count() <= 120));
            assert_eq!(reconstruct(&chunks), source);
        }

        #[test]
        fn file_without_definitions_uses_fallback() {
            let source = "x = 1\ny = 2\n".repeat(20);
            let chunks: Vec<_> = splitter(30, 6).split(&source, &py()).collect();
            assert!(chunks.iter().all(|c| c.node_type == "fallback"));
            assert_eq!(reconstruct(&chunks), source);
        }
    }

    proptest! {
        #[test]
        fn fallback_reconstructs_and_respects_budget(
            text in "(\\PC|\n){0,600}",
            max_chars in 5usize..120,
            overlap_pct in 0usize..50,
        ) {
            let overlap = max_chars * overlap_pct / 100;
            let chunks: Vec<_> = splitter(max_chars, overlap).split(&text, &plain()).collect();
            prop_assert_eq!(reconstruct(&chunks), text.clone());
            for chunk in &chunks {
                prop_assert!(chunk.code.chars().count() <= max_chars);
                prop_assert!(!chunk.fresh_text().is_empty());
            }
            prop_assert_eq!(chunks.is_empty(), text.is_empty());
        }
    }

    #[cfg(feature = "lang-python")]
    proptest! {
        #[test]
        fn structural_reconstructs_and_respects_budget(
            names in proptest::collection::vec("[a-z]{1,8}", 0..12),
            max_chars in 20usize..200,
        ) {
            let source: String = names
                .iter()
                .map(|n| format!("def {n}(a):\n    return a\n\n"))
                .collect();
            let hints = SplitHints::for_file("r", "m.py");
            let chunks: Vec<_> = splitter(max_chars, max_chars / 5).split(&source, &hints).collect();
            prop_assert_eq!(reconstruct(&chunks), source);
            for chunk in &chunks {
                prop_assert!(chunk.code.chars().count() <= max_chars);
            }
        }
    }
}
