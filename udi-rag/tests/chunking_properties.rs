//! Property tests for sentence chunking.

use proptest::prelude::*;
use udi_rag::chunking::{Chunker, SentenceChunker};

/// Text made of words, sentence punctuation and assorted whitespace.
fn arb_document() -> impl Strategy<Value = String> {
    let word = prop_oneof![
        "[A-Za-z]{1,10}",
        "[0-9]{1,4}(\\.[0-9]{2})?",
        "[A-Za-z]{1,8}[.!?]",
        "\\$[0-9]{1,3},[0-9]{3}\\.[0-9]{2}",
        "[éüçñ]{1,3}",
    ];
    let separator = prop_oneof![Just(" "), Just("  "), Just("\n"), Just("\t"), Just(" \n\n")];
    proptest::collection::vec((word, separator), 1..200).prop_map(|parts| {
        parts.into_iter().map(|(w, s)| format!("{w}{s}")).collect::<String>()
    })
}

/// *For any* non-blank text, chunking yields at least one chunk, every chunk
/// is an exact slice of the source, offsets never move backwards, and the
/// chunks together cover every word.
mod prop_chunk_offsets {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn chunks_are_ordered_slices_covering_the_text(
            text in arb_document(),
            target in 2usize..40,
            overlap in 0usize..20,
        ) {
            let chunker = SentenceChunker::new(target, overlap);
            let chunks = chunker.chunk("doc", &text).unwrap();
            prop_assert!(!chunks.is_empty());

            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(&text[chunk.start..chunk.end], chunk.text.as_str());
                prop_assert!(!chunk.text.trim().is_empty());
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[0].start <= pair[1].start);
                prop_assert!(pair[0].end <= pair[1].end);
                // only whitespace may fall between consecutive chunks
                let gap_is_blank = pair[1].start <= pair[0].end
                    || text[pair[0].end..pair[1].start].trim().is_empty();
                prop_assert!(gap_is_blank);
            }

            let first = text.len() - text.trim_start().len();
            let last = text.trim_end().len();
            prop_assert_eq!(chunks[0].start, first);
            prop_assert_eq!(chunks[chunks.len() - 1].end, last);
        }

        #[test]
        fn chunk_word_counts_are_bounded(
            text in arb_document(),
            target in 2usize..40,
            overlap in 0usize..20,
        ) {
            let chunker = SentenceChunker::new(target, overlap);
            let overlap = overlap.min(target - 1);
            for chunk in chunker.chunk("doc", &text).unwrap() {
                let words = chunk.text.split_whitespace().count();
                prop_assert!(words <= target + overlap, "{words} words > {target} + {overlap}");
            }
        }
    }
}
