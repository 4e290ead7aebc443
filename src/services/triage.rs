//! Plain-text triage: validates the document format and splits the text into
//! ordered chunks along paragraph, line, sentence and word boundaries.

use std::path::Path;

use tracing::debug;

use super::Triage;
use crate::error::{PipelineError, Result};
use crate::state_machine::{Chunk, Document};

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv", "log"];

/// Coarsest boundary first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

pub struct PlainTextTriage {
    max_chunk_chars: usize,
}

impl PlainTextTriage {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }

    fn check_format(name: &str) -> Result<()> {
        let Some(ext) = Path::new(name).extension() else {
            return Ok(());
        };
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedFormat(format!(
                "'.{ext}' documents need a format-specific extractor"
            )))
        }
    }

    /// Splits `text` into pieces of at most `max_chunk_chars` characters.
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if trimmed.chars().count() <= self.max_chunk_chars {
            return vec![trimmed.to_string()];
        }
        let Some((separator, finer)) = separators.split_first() else {
            return self.hard_split(trimmed);
        };

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for piece in trimmed.split_inclusive(separator) {
            if piece.trim().chars().count() > self.max_chunk_chars {
                flush(&mut current, &mut current_len, &mut chunks);
                chunks.extend(self.split(piece, finer));
                continue;
            }
            let piece_len = piece.chars().count();
            if current_len + piece_len > self.max_chunk_chars {
                flush(&mut current, &mut current_len, &mut chunks);
            }
            current.push_str(piece);
            current_len += piece_len;
        }
        flush(&mut current, &mut current_len, &mut chunks);
        chunks
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.max_chunk_chars)
            .map(|c| c.iter().collect::<String>())
            .collect()
    }
}

fn flush(current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>) {
    let text = current.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
    current.clear();
    *current_len = 0;
}

/// Drops carriage returns and trailing whitespace so blank lines are exactly `\n\n`.
fn normalize(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Triage for PlainTextTriage {
    fn extract(&self, document: &Document) -> Result<Vec<Chunk>> {
        Self::check_format(&document.name)?;

        let text = std::str::from_utf8(&document.bytes).map_err(|e| {
            PipelineError::UnsupportedFormat(format!("{} is not UTF-8 text: {e}", document.name))
        })?;
        if text.contains('\0') {
            return Err(PipelineError::Extraction(format!(
                "{} contains NUL bytes",
                document.name
            )));
        }

        let chunks: Vec<Chunk> = self
            .split(&normalize(text), SEPARATORS)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(index, text))
            .collect();

        debug!(
            document = %document.id,
            chunks = chunks.len(),
            "triage split document"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, text: &str) -> Document {
        Document::new(name, text.as_bytes().to_vec())
    }

    #[test]
    fn paragraphs_become_chunks_in_order() {
        let triage = PlainTextTriage::new(40);
        let text = "Solar output rose sharply in May.\n\nWind held steady all month.\r\n\r\nGas use fell to a record low.";
        let chunks = triage.extract(&doc("report.txt", text)).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Solar output rose sharply in May.");
        assert_eq!(chunks[1].text, "Wind held steady all month.");
        assert_eq!(chunks[2].text, "Gas use fell to a record low.");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.byte_len, chunk.text.len());
        }
    }

    #[test]
    fn small_paragraphs_are_packed_together() {
        let triage = PlainTextTriage::new(200);
        let chunks = triage
            .extract(&doc("notes.md", "One.\n\nTwo.\n\nThree."))
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One.\n\nTwo.\n\nThree.");
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let triage = PlainTextTriage::new(30);
        let text = "The first sentence is here. The second sentence follows. A third one ends it.";
        let chunks = triage.extract(&doc("a.txt", text)).unwrap();

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 30));
        assert_eq!(chunks[0].text, "The first sentence is here.");
    }

    #[test]
    fn unbroken_text_is_hard_split() {
        let triage = PlainTextTriage::new(10);
        let chunks = triage.extract(&doc("a.txt", &"x".repeat(25))).unwrap();
        let lens: Vec<usize> = chunks.iter().map(|c| c.text.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn blank_document_has_no_chunks() {
        let triage = PlainTextTriage::new(100);
        assert!(triage.extract(&doc("a.txt", " \n\n \n")).unwrap().is_empty());
    }

    #[test]
    fn binary_formats_are_unsupported() {
        let triage = PlainTextTriage::new(100);
        let err = triage.extract(&doc("paper.PDF", "%PDF-1.7")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));

        let bytes = Document::new("notes", vec![0xff, 0xfe, 0x00]);
        let err = triage.extract(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn nul_bytes_fail_extraction() {
        let triage = PlainTextTriage::new(100);
        let err = triage.extract(&doc("a.txt", "abc\0def")).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }
}
