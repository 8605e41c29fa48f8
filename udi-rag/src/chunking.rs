//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`SentenceChunker`], which
//! packs whole sentences into word-bounded windows with a sliding overlap.
//!
//! Chunks are always exact slices of the source text: a chunk's `text` equals
//! `source[start..end]`, so offsets can be used for source attribution and no
//! character outside the original text is ever produced.

use crate::config::ChunkingConfig;
use crate::document::Chunk;
use crate::error::{RagError, Result};

/// A strategy for splitting document text into chunks.
///
/// Implementations produce [`Chunk`]s with text and offsets but no embeddings.
/// Embeddings are attached later by the service.
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered chunks belonging to `document_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] when `text` is empty or whitespace.
    fn chunk(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>>;
}

/// Packs sentences into chunks of roughly `target_words` words.
///
/// Sentences end at `.`, `!` or `?` followed by whitespace (closing quotes and
/// brackets may sit in between), so decimals such as `1,250.00` do not split.
/// When the running word count would pass `target_words`, the chunk is closed
/// and the next one starts by repeating up to `overlap_words` trailing words,
/// snapped forward to a sentence start when one is available. A sentence
/// longer than `target_words` is cut into word windows. Text without any
/// sentence punctuation is cut into fixed word windows.
///
/// # Example
///
/// ```rust,ignore
/// use udi_rag::{Chunker, SentenceChunker};
///
/// let chunker = SentenceChunker::new(500, 100);
/// let chunks = chunker.chunk("bol-1", &text)?;
/// ```
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    target_words: usize,
    overlap_words: usize,
    min_chunk_words: usize,
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

impl SentenceChunker {
    /// Create a chunker with the given window and overlap, in words.
    pub fn new(target_words: usize, overlap_words: usize) -> Self {
        let target_words = target_words.max(1);
        Self {
            target_words,
            overlap_words: overlap_words.min(target_words - 1),
            min_chunk_words: ChunkingConfig::default().min_chunk_words,
        }
    }

    /// Create a chunker from a [`ChunkingConfig`].
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.target_words, config.overlap_words)
            .with_min_chunk_words(config.min_chunk_words)
    }

    /// Set the minimum number of new words a trailing chunk must carry to
    /// stand on its own.
    pub fn with_min_chunk_words(mut self, words: usize) -> Self {
        self.min_chunk_words = words;
        self
    }

    /// Choose where the chunk after `[start, end)` begins.
    fn overlap_start(&self, start: usize, end: usize, words: &[Word]) -> usize {
        let floor = end.saturating_sub(self.overlap_words).max(start + 1);
        if floor >= end {
            return end;
        }
        (floor..end).find(|&i| i == 0 || words[i - 1].ends_sentence).unwrap_or(floor)
    }

    /// Pack sentence-bounded units into word ranges.
    fn pack(&self, words: &[Word]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut start = 0;
        let mut end = 0;

        for (_, unit_end) in self.units(words) {
            if end > start && unit_end - start > self.target_words {
                ranges.push((start, end));
                start = self.overlap_start(start, end, words);
            }
            end = unit_end;
        }
        if end > start {
            ranges.push((start, end));
        }
        ranges
    }

    /// Sentences, with any sentence longer than the target cut into pieces.
    fn units(&self, words: &[Word]) -> Vec<(usize, usize)> {
        let mut units = Vec::new();
        let mut sentence_start = 0;
        for (i, word) in words.iter().enumerate() {
            if word.ends_sentence || i + 1 == words.len() {
                let mut piece_start = sentence_start;
                while piece_start <= i {
                    let piece_end = (piece_start + self.target_words).min(i + 1);
                    units.push((piece_start, piece_end));
                    piece_start = piece_end;
                }
                sentence_start = i + 1;
            }
        }
        units
    }

    /// Fixed windows of `target_words` advancing by `target_words - overlap_words`.
    fn windows(&self, word_count: usize) -> Vec<(usize, usize)> {
        let step = self.target_words.saturating_sub(self.overlap_words).max(1);
        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.target_words).min(word_count);
            ranges.push((start, end));
            if end == word_count {
                break;
            }
            start += step;
        }
        ranges
    }

    /// Fold a trailing chunk that adds too few new words into its predecessor,
    /// provided the result stays within `target_words + overlap_words`.
    fn merge_short_tail(&self, ranges: &mut Vec<(usize, usize)>) {
        if ranges.len() < 2 {
            return;
        }
        let (_, tail_end) = ranges[ranges.len() - 1];
        let (prev_start, prev_end) = ranges[ranges.len() - 2];
        let new_words = tail_end.saturating_sub(prev_end);
        if new_words < self.min_chunk_words
            && tail_end - prev_start <= self.target_words + self.overlap_words
        {
            ranges.pop();
            if let Some(prev) = ranges.last_mut() {
                prev.1 = tail_end;
            }
        }
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>> {
        let words = scan_words(text);
        if words.is_empty() {
            return Err(RagError::EmptyDocument);
        }

        let mut ranges = if words.iter().any(|w| w.ends_sentence) {
            self.pack(&words)
        } else {
            self.windows(words.len())
        };
        self.merge_short_tail(&mut ranges);

        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(index, (first, last))| {
                let start = words[first].start;
                let end = words[last - 1].end;
                Chunk::new(document_id, index, &text[start..end], start, end)
            })
            .collect())
    }
}

/// A whitespace-delimited word with byte offsets.
#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
    ends_sentence: bool,
}

fn scan_words(text: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut word_start = None;

    for (pos, ch) in text.char_indices() {
        match (ch.is_whitespace(), word_start) {
            (true, Some(start)) => {
                words.push(word(text, start, pos));
                word_start = None;
            }
            (false, None) => word_start = Some(pos),
            _ => {}
        }
    }
    if let Some(start) = word_start {
        words.push(word(text, start, text.len()));
    }
    words
}

fn word(text: &str, start: usize, end: usize) -> Word {
    const CLOSERS: [char; 7] = ['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}'];
    let ends_sentence = text[start..end].trim_end_matches(CLOSERS).ends_with(['.', '!', '?']);
    Word { start, end, ends_sentence }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_of(chunk: &Chunk) -> usize {
        chunk.text.split_whitespace().count()
    }

    #[test]
    fn empty_text_is_rejected() {
        let chunker = SentenceChunker::default();
        assert!(matches!(chunker.chunk("doc", ""), Err(RagError::EmptyDocument)));
        assert!(matches!(chunker.chunk("doc", "  \n\t "), Err(RagError::EmptyDocument)));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let text = "Shipper: Acme Corp. Consignee: Globex Inc. Rate: $1,250.00 USD.";
        let chunks = SentenceChunker::default().chunk("bol", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!((chunks[0].start, chunks[0].end), (0, text.len()));
        assert_eq!(chunks[0].document_id, "bol");
    }

    #[test]
    fn decimals_do_not_end_sentences() {
        let text = "Rate: $1,250.00 USD";
        let chunks = SentenceChunker::default().chunk("doc", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn surrounding_whitespace_is_outside_the_chunk() {
        let text = "\n\n  Load ID: LD-5531.  \n";
        let chunks = SentenceChunker::default().chunk("doc", text).unwrap();
        assert_eq!(chunks[0].text, "Load ID: LD-5531.");
        assert_eq!(&text[chunks[0].start..chunks[0].end], chunks[0].text);
    }

    #[test]
    fn sentences_are_packed_with_overlap() {
        // Eight sentences of five words each.
        let text = (0..8)
            .map(|i| format!("Sentence {i} has five words."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = SentenceChunker::new(12, 5).with_min_chunk_words(0);
        let chunks = chunker.chunk("doc", &text).unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            assert!(chunk.text.starts_with("Sentence"), "chunk {i} starts mid-sentence");
            assert!(chunk.text.ends_with('.'), "chunk {i} ends mid-sentence");
            assert!(words_of(chunk) <= 12 + 5);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start < pair[0].end, "consecutive chunks should overlap");
        }
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn unpunctuated_text_uses_word_windows() {
        let text = (0..25).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunker = SentenceChunker::new(10, 2).with_min_chunk_words(0);
        let chunks = chunker.chunk("doc", &text).unwrap();
        let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert_eq!(first.len(), 10);
        assert_eq!(second[0], "w8");
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn overlong_sentence_is_cut_into_windows() {
        let long = (0..30).map(|i| format!("x{i}")).collect::<Vec<_>>().join(" ");
        let text = format!("Short one. {long}.");
        let chunker = SentenceChunker::new(10, 3).with_min_chunk_words(0);
        let chunks = chunker.chunk("doc", &text).unwrap();
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(words_of(chunk) <= 13);
        }
    }

    #[test]
    fn tiny_tail_is_merged_into_previous_chunk() {
        let text = "One two three four five six. Seven eight nine ten eleven twelve. End.";
        let chunker = SentenceChunker::new(12, 2).with_min_chunk_words(3);
        let chunks = chunker.chunk("doc", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn offsets_are_byte_offsets_for_non_ascii_text() {
        let text = "Café déjà vu. Über naïve façade! Ça va?";
        let chunks = SentenceChunker::new(3, 1).with_min_chunk_words(0).chunk("doc", text).unwrap();
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }
}
