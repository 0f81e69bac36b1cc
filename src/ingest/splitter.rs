//! Recursive text splitting with overlap
//!
//! Wraps the character-based recursive splitter so chunks prefer paragraph,
//! sentence and word boundaries. PDFs are split page by page so every chunk
//! keeps its page number; ordinals run across the whole document.

use super::parser::PageText;
use crate::error::{QuarryError, Result};
use crate::storage::NewChunk;
use text_splitter::{Characters, ChunkConfig, TextSplitter};

pub struct ChunkSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split extracted pages into chunks with document-wide ordinals
    pub fn split_pages(&self, pages: &[PageText]) -> Result<Vec<NewChunk>> {
        let mut chunks = Vec::new();
        let mut ordinal = 0i64;

        for page in pages {
            for piece in self.split_text(&page.text)? {
                chunks.push(NewChunk {
                    chunk_index: ordinal,
                    page: page.page,
                    content: piece,
                });
                ordinal += 1;
            }
        }

        Ok(chunks)
    }

    fn split_text(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let config = ChunkConfig::new(self.chunk_size)
            .with_sizer(Characters)
            .with_trim(true)
            .with_overlap(self.chunk_overlap)
            .map_err(|e| QuarryError::Config(format!("Invalid chunking config: {}", e)))?;
        let splitter = TextSplitter::new(config);

        Ok(splitter
            .chunks(text)
            .map(|s: &str| s.to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, page: Option<i64>) -> PageText {
        PageText {
            page,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = ChunkSplitter::new(500, 100);
        let chunks = splitter.split_pages(&[page("A short paragraph.", None)]).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "A short paragraph.");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, None);
    }

    #[test]
    fn test_long_text_splits_within_size() {
        let splitter = ChunkSplitter::new(100, 20);
        let text = "Lorem ipsum dolor sit amet. ".repeat(30);
        let chunks = splitter.split_pages(&[page(&text, None)]).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 100);
        }
    }

    #[test]
    fn test_splitter_prefers_paragraph_boundaries() {
        let splitter = ChunkSplitter::new(40, 0);
        let text = "First paragraph here.\n\nSecond paragraph follows it closely.";
        let chunks = splitter.split_pages(&[page(text, None)]).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "First paragraph here.");
        assert_eq!(chunks[1].content, "Second paragraph follows it closely.");
    }

    #[test]
    fn test_ordinals_run_across_pages() {
        let splitter = ChunkSplitter::new(500, 100);
        let pages = vec![
            page("Page one text.", Some(1)),
            page("Page two text.", Some(2)),
            page("Page three text.", Some(3)),
        ];
        let chunks = splitter.split_pages(&pages).unwrap();

        assert_eq!(chunks.len(), 3);
        let ordinals: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);

        // Page numbers are non-decreasing along ordinal order
        let pages: Vec<Option<i64>> = chunks.iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_empty_pages_are_skipped() {
        let splitter = ChunkSplitter::new(500, 100);
        let pages = vec![
            page("Content.", Some(1)),
            page("   \n  ", Some(2)),
            page("More content.", Some(3)),
        ];
        let chunks = splitter.split_pages(&pages).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(3));
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        // Construction must not panic when overlap >= size
        let splitter = ChunkSplitter::new(10, 50);
        let chunks = splitter
            .split_pages(&[page("word ".repeat(20).as_str(), None)])
            .unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_overlapping_chunks_share_text() {
        let splitter = ChunkSplitter::new(40, 15);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = splitter.split_pages(&[page(text, None)]).unwrap();

        assert!(chunks.len() > 1);
        // Consecutive chunks overlap, so some words appear twice
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(" ");
        assert!(joined.len() > text.len());
    }
}
