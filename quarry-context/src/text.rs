//! This module splits note documents into overlapping fixed-size windows with
//! stable, content-derived identifiers, for use by a semantic retrieval index.
//!
//! Documents are first divided into paragraph blocks (runs of non-blank
//! lines, trailing whitespace trimmed); a sliding window of `chunk_size`
//! bytes then advances through each block, overlapping the previous window
//! by `chunk_overlap` bytes so a passage straddling a window edge is still
//! retrievable as a whole from at least one chunk. Windows never cross a
//! paragraph boundary, so editing or appending one paragraph leaves every
//! other paragraph's chunks — and their ids — untouched. When a window
//! would end mid-word, the cut is pulled back to the nearest whitespace
//! within a bounded look-back so chunks end on word boundaries whenever the
//! text allows it.
//!
//! The module defines:
//! - [`Chunker`]: configured splitter producing [`Chunk`]s from document text.
//! - [`Chunk`]: one text span with its byte offsets, source path, and ids.
//! - [`ChunkId`]: blake3-derived identity over (path, offsets, text).
//!
//! ## Identity
//!
//! A chunk id is a blake3 hash of the document path, the span's byte
//! offsets, and the span text. Identical input text always reproduces the
//! same boundaries and therefore the same ids; a chunk's id changes exactly
//! when its underlying span changes. Separately, `text_hash` hashes the span
//! text alone — two chunks with equal text share a `text_hash` even when
//! they sit at different offsets or in different documents, which is what
//! lets an embedding cache skip re-embedding text that merely moved.
//!
//! ## Determinism
//!
//! `chunk` is a pure function of its inputs. Empty and whitespace-only
//! documents produce zero chunks (not an error). All offsets are byte
//! offsets into the original text and always lie on UTF-8 boundaries.

use serde::{Serialize, Serializer};
use std::fmt;

/// Stable identity of one chunk: blake3 over (path, start, end, text).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId([u8; 32]);

impl ChunkId {
    /// Compute the id for a span of `text` at `start..end` within the
    /// document at `path`.
    pub fn compute(path: &str, start: usize, end: usize, text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0xff]);
        hasher.update(&(start as u64).to_le_bytes());
        hasher.update(&(end as u64).to_le_bytes());
        hasher.update(&[0xff]);
        hasher.update(text.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({}..)", &self.to_hex()[..12])
    }
}

impl Serialize for ChunkId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

/// One contiguous text span extracted from a document.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// Identity over (path, offsets, text); see module docs.
    pub id: ChunkId,
    /// Path of the source document.
    pub path: String,
    /// Start byte offset of the span in the document.
    pub start: usize,
    /// End byte offset (exclusive) of the span in the document.
    pub end: usize,
    /// The span text itself.
    pub text: String,
    /// blake3 of the span text alone — the embedding cache key.
    #[serde(serialize_with = "serialize_hash")]
    pub text_hash: [u8; 32],
}

fn serialize_hash<S>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hash.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

/// Window size and overlap for the chunker.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ChunkerConfig {
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in bytes; must be < `chunk_size`.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Check the window parameters. Overlap must leave room for the window
    /// to advance, and the window must be able to hold at least one
    /// multi-byte character.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size < 8 {
            return Err(format!("chunk_size must be at least 8, got {}", self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        Ok(())
    }
}

/// Splits document text into overlapping windows with stable ids.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker from a validated configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid; callers validate via
    /// [`ChunkerConfig::validate`] at startup.
    pub fn new(config: ChunkerConfig) -> Self {
        config
            .validate()
            .unwrap_or_else(|e| panic!("invalid chunker config: {e}"));
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. Deterministic: identical input yields
    /// identical boundaries and ids. Empty or whitespace-only input yields
    /// an empty vector.
    pub fn chunk(&self, path: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        if text.trim().is_empty() {
            return chunks;
        }

        for (block_start, block_end) in paragraph_spans(text) {
            self.chunk_block(path, text, block_start, block_end, &mut chunks);
        }
        chunks
    }

    /// Window one paragraph block into chunks, appending to `chunks`.
    fn chunk_block(
        &self,
        path: &str,
        text: &str,
        block_start: usize,
        block_end: usize,
        chunks: &mut Vec<Chunk>,
    ) {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        // How far back from the window edge we are willing to move a cut to
        // land on whitespace.
        let lookback = size / 4;

        let mut start = block_start;
        while start < block_end {
            let mut end = (start + size).min(block_end);
            while end < block_end && !text.is_char_boundary(end) {
                end -= 1;
            }
            if end <= start {
                // A single character wider than the window; take it whole.
                end = (start + 1..=block_end)
                    .find(|&i| text.is_char_boundary(i))
                    .unwrap_or(block_end);
            } else if end < block_end {
                // Prefer to cut just after whitespace near the window edge
                // rather than mid-word.
                let window = &text[start..end];
                if let Some(pos) = window.rfind(char::is_whitespace) {
                    let ws_len = window[pos..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                    let cut = start + pos + ws_len;
                    if cut > start && cut + lookback >= end {
                        end = cut;
                    }
                }
            }

            let span = &text[start..end];
            if !span.trim().is_empty() {
                chunks.push(Chunk {
                    id: ChunkId::compute(path, start, end, span),
                    path: path.to_string(),
                    start,
                    end,
                    text: span.to_string(),
                    text_hash: *blake3::hash(span.as_bytes()).as_bytes(),
                });
            }

            if end >= block_end {
                break;
            }
            // Step back by the overlap, but always make forward progress.
            let mut next = end.saturating_sub(overlap);
            if next <= start {
                next = end;
            }
            while next < block_end && !text.is_char_boundary(next) {
                next += 1;
            }
            start = next;
        }
    }
}

/// Byte spans of the paragraph blocks of `text`: maximal runs of non-blank
/// lines, trailing whitespace trimmed from each block. Blank separator
/// lines belong to no block, which is what keeps a paragraph's span — and
/// its chunk ids — stable when paragraphs are appended after it.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut block_start: Option<usize> = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(start) = block_start.take() {
                spans.push((start, offset));
            }
        } else if block_start.is_none() {
            block_start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(start) = block_start {
        spans.push((start, text.len()));
    }

    // Trim trailing whitespace (including the final line's newline) so a
    // block's span does not change when text is appended after it.
    spans
        .into_iter()
        .filter_map(|(start, end)| {
            let trimmed = text[start..end].trim_end();
            if trimmed.is_empty() {
                None
            } else {
                Some((start, start + trimmed.len()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig::new(size, overlap))
    }

    #[test]
    fn empty_and_whitespace_documents_produce_no_chunks() {
        let c = chunker(100, 20);
        assert!(c.chunk("a.md", "").is_empty());
        assert!(c.chunk("a.md", "   \n\t  \n").is_empty());
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let c = chunker(100, 20);
        let chunks = c.chunk("a.md", "The cat sat on the mat.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 23);
        assert_eq!(chunks[0].text, "The cat sat on the mat.");
    }

    #[test]
    fn chunking_is_deterministic() {
        let c = chunker(80, 16);
        let text = (0..40).map(|i| format!("sentence number {i}. ")).collect::<String>();
        let a = c.chunk("notes/doc.md", &text);
        let b = c.chunk("notes/doc.md", &text);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.start, y.start);
            assert_eq!(x.end, y.end);
        }
    }

    #[test]
    fn windows_overlap_and_cover_the_document() {
        let c = chunker(100, 25);
        let text = (0..30).map(|i| format!("word{i} is here. ")).collect::<String>();
        let chunks = c.chunk("a.md", &text);
        assert!(chunks.len() > 1);

        // First chunk starts at 0 and the last reaches the end of the
        // text (trailing whitespace excluded).
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, text.trim_end().len());

        // Consecutive windows overlap, leaving no gap.
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "gap between windows");
        }
        // Chunks stay within the configured size.
        for chunk in &chunks {
            assert!(chunk.text.len() <= 100);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn cuts_fall_on_whitespace_when_available() {
        let c = chunker(50, 10);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = c.chunk("a.md", text);
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(char::is_whitespace),
                "window should end after whitespace: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn appending_text_leaves_earlier_chunk_ids_unchanged() {
        let c = chunker(64, 16);
        let base = (0..10).map(|i| format!("stable paragraph {i}. ")).collect::<String>();
        let before = c.chunk("a.md", &base);

        let extended = format!("{base}And now an entirely new trailing paragraph.");
        let after = c.chunk("a.md", &extended);

        // Every chunk that ended strictly before the appended text keeps
        // its id in the new chunking.
        let after_ids: std::collections::HashSet<_> = after.iter().map(|ch| ch.id).collect();
        for chunk in before.iter().filter(|ch| ch.end + 64 < base.len()) {
            assert!(after_ids.contains(&chunk.id), "id lost for {:?}", chunk.text);
        }
    }

    #[test]
    fn paragraphs_are_chunked_independently() {
        let c = chunker(200, 40);
        let text = "First paragraph about cats.\n\nSecond paragraph about dogs.\n";
        let chunks = c.chunk("a.md", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph about cats.");
        assert_eq!(chunks[1].text, "Second paragraph about dogs.");
        // The separator blank line belongs to neither chunk.
        assert!(chunks[1].start > chunks[0].end);
    }

    #[test]
    fn appending_a_paragraph_preserves_every_earlier_chunk_id() {
        let c = chunker(200, 40);
        let base = "The cat sat on the mat.";
        let before = c.chunk("a.md", base);
        assert_eq!(before.len(), 1);

        let extended = format!("{base}\n\nQuantum computers use qubits.");
        let after = c.chunk("a.md", &extended);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].text, base);
        assert_ne!(after[1].id, after[0].id);
    }

    #[test]
    fn editing_one_paragraph_leaves_earlier_paragraphs_untouched() {
        let c = chunker(200, 40);
        let original = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph.";
        let edited = "Alpha paragraph.\n\nBeta paragraph, now reworded a bit.\n\nGamma paragraph.";

        let before = c.chunk("a.md", original);
        let after = c.chunk("a.md", edited);
        assert_eq!(before.len(), 3);
        assert_eq!(after.len(), 3);

        // The paragraph before the edit keeps its id; the edited one does
        // not; the shifted one keeps its text hash (so its embedding is
        // still a cache hit) even though its offsets moved.
        assert_eq!(after[0].id, before[0].id);
        assert_ne!(after[1].id, before[1].id);
        assert_ne!(after[2].id, before[2].id);
        assert_eq!(after[2].text_hash, before[2].text_hash);
    }

    #[test]
    fn equal_text_at_different_offsets_shares_text_hash_but_not_id() {
        let text = "the same passage";
        let a = ChunkId::compute("a.md", 0, 16, text);
        let b = ChunkId::compute("a.md", 100, 116, text);
        let other_doc = ChunkId::compute("b.md", 0, 16, text);
        assert_ne!(a, b);
        assert_ne!(a, other_doc);
    }

    #[test]
    fn multibyte_text_offsets_stay_on_char_boundaries() {
        let c = chunker(20, 5);
        let text = "héllö wörld ünïcödé tèxt with äccénts everywhere öh my";
        let chunks = c.chunk("a.md", text);
        for chunk in &chunks {
            assert!(text.is_char_boundary(chunk.start));
            assert!(text.is_char_boundary(chunk.end));
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(ChunkerConfig::new(100, 100).validate().is_err());
        assert!(ChunkerConfig::new(4, 0).validate().is_err());
        assert!(ChunkerConfig::new(100, 20).validate().is_ok());
    }
}
