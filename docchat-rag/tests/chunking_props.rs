//! Property tests for the character splitter.

use docchat_rag::chunking::split;
use docchat_rag::document::{Chunk, Document};
use proptest::prelude::*;

/// Undo the overlap between consecutive chunks using their character offsets.
fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0;
    for chunk in chunks {
        let skip = covered - chunk.char_offset;
        text.extend(chunk.text.chars().skip(skip));
        covered = chunk.char_offset + chunk.text.chars().count();
    }
    text
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{0,400}",
        "[a-zA-Z0-9 .,\n]{0,600}",
        "([a-z]{1,12}( |\n|\n\n)){0,80}",
        "[αβγ日本 é\n]{0,200}",
    ]
}

fn arb_params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..120).prop_flat_map(|size| (Just(size), 0..size))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Stripping each chunk's overlap with its predecessor gives back the
    /// original text, and no chunk exceeds the size limit.
    #[test]
    fn chunks_reconstruct_the_text(text in arb_text(), (size, overlap) in arb_params()) {
        let document = Document::new("doc.pdf", text.clone());
        let chunks = split(&document, size, overlap).unwrap();

        prop_assert_eq!(reconstruct(&chunks), text.clone());
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(chunk.text.chars().count() <= size);
            prop_assert!(!chunk.text.is_empty());
            prop_assert_eq!(chunk.chunk_index, i);
        }
        for pair in chunks.windows(2) {
            let prev_end = pair[0].char_offset + pair[0].text.chars().count();
            prop_assert_eq!(prev_end - pair[1].char_offset, overlap);
        }
        if text.chars().count() <= size {
            prop_assert_eq!(chunks.len(), usize::from(!text.is_empty()));
        }
    }

    #[test]
    fn splitting_is_deterministic(text in arb_text(), (size, overlap) in arb_params()) {
        let document = Document::new("doc.pdf", text);
        prop_assert_eq!(
            split(&document, size, overlap).unwrap(),
            split(&document, size, overlap).unwrap()
        );
    }
}
