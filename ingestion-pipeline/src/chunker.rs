//! Semantic text chunking at delimiter boundaries.
//!
//! Scans backward from the target window end for a delimiter; in suffix mode
//! the delimiter stays with the current chunk, in prefix mode it opens the
//! next one. When the window holds no delimiter an optional forward scan
//! looks past the window end, bounded so no chunk exceeds twice the target
//! size. Chunks partition the input exactly.

/// A bounded contiguous slice of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in bytes.
    pub size: usize,
    /// Single-byte delimiters.
    pub delimiters: Vec<u8>,
    /// Delimiter opens the next chunk instead of closing the current one.
    pub prefix_mode: bool,
    /// Treat a run of consecutive delimiters as one boundary.
    pub collapse_consecutive: bool,
    /// Scan past the window end when the window holds no delimiter.
    pub forward_fallback: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            size: 4096,
            delimiters: b"\n.?".to_vec(),
            prefix_mode: false,
            collapse_consecutive: false,
            forward_fallback: true,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    fn is_delimiter(&self, byte: u8) -> bool {
        self.config.delimiters.contains(&byte)
    }

    /// Move a proposed split back onto a UTF-8 character boundary.
    fn clamp_to_char_boundary(text: &str, mut pos: usize) -> usize {
        while pos > 0 && !text.is_char_boundary(pos) {
            pos -= 1;
        }
        pos
    }

    /// End of the delimiter run starting at `index` (exclusive).
    fn run_end(&self, bytes: &[u8], index: usize) -> usize {
        let mut end = index;
        while end < bytes.len() && self.is_delimiter(bytes[end]) {
            end += 1;
        }
        end
    }

    /// Start of the delimiter run ending at `index` (inclusive).
    fn run_start(&self, bytes: &[u8], index: usize) -> usize {
        let mut start = index;
        while start > 0 && self.is_delimiter(bytes[start - 1]) {
            start -= 1;
        }
        start
    }

    /// Split position derived from a delimiter found at absolute `index`.
    fn split_at_delimiter(&self, bytes: &[u8], index: usize) -> usize {
        if self.config.prefix_mode {
            if self.config.collapse_consecutive {
                self.run_start(bytes, index)
            } else {
                index
            }
        } else if self.config.collapse_consecutive {
            self.run_end(bytes, index)
        } else {
            index + 1
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        self.chunk_page(text, None)
    }

    /// Chunk one page, carrying its page number into every chunk.
    pub fn chunk_page(&self, text: &str, page_number: Option<u32>) -> Vec<Chunk> {
        let bytes = text.as_bytes();
        let size = self.config.size.max(1);
        let mut chunks = Vec::new();
        let mut position = 0_usize;

        while position < bytes.len() {
            let remaining = bytes.len() - position;

            if remaining <= size {
                chunks.push(Self::make_chunk(text, position, bytes.len(), page_number));
                break;
            }

            let window_end = position + size;
            let split = self
                .backward_split(bytes, position, window_end)
                .or_else(|| self.forward_split(bytes, position, window_end))
                .unwrap_or_else(|| Self::clamp_to_char_boundary(text, window_end));

            // A split that makes no progress would loop forever; hard-split
            // the window instead.
            let split = if split <= position {
                Self::clamp_to_char_boundary(text, window_end).max(position + 1)
            } else {
                split
            };

            chunks.push(Self::make_chunk(text, position, split, page_number));
            position = split;
        }

        chunks
    }

    fn backward_split(&self, bytes: &[u8], position: usize, window_end: usize) -> Option<usize> {
        let window = bytes.get(position..window_end)?;
        let index = window.iter().rposition(|b| self.is_delimiter(*b))?;
        let split = self.split_at_delimiter(bytes, position + index);
        (split > position).then_some(split)
    }

    fn forward_split(&self, bytes: &[u8], position: usize, window_end: usize) -> Option<usize> {
        if !self.config.forward_fallback {
            return None;
        }

        // Bounded so a missing delimiter cannot produce a chunk larger than
        // twice the target size.
        let scan_end = (position + self.config.size * 2).min(bytes.len());
        let window = bytes.get(window_end..scan_end)?;
        let index = window.iter().position(|b| self.is_delimiter(*b))?;
        let split = self.split_at_delimiter(bytes, window_end + index);
        (split > position).then_some(split)
    }

    fn make_chunk(text: &str, start: usize, end: usize, page_number: Option<u32>) -> Chunk {
        let start = Self::clamp_to_char_boundary(text, start);
        let end = Self::clamp_to_char_boundary(text, end).max(start);
        Chunk {
            text: text.get(start..end).unwrap_or_default().to_string(),
            start_offset: start,
            end_offset: end,
            page_number,
        }
    }

    /// Chunk a document given as `(page_number, text)` pairs.
    pub fn chunk_pages(&self, pages: &[(u32, String)]) -> Vec<Chunk> {
        pages
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .flat_map(|(page, text)| self.chunk_page(text, Some(*page)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, delimiters: &[u8]) -> ChunkerConfig {
        ChunkerConfig {
            size,
            delimiters: delimiters.to_vec(),
            ..ChunkerConfig::default()
        }
    }

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_short_input_is_a_single_chunk() {
        let chunker = Chunker::new(config(100, b"."));
        let chunks = chunker.chunk("Hello world.");
        assert_eq!(texts(&chunks), vec!["Hello world."]);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 12);
    }

    #[test]
    fn test_suffix_mode_keeps_delimiter_with_current_chunk() {
        let chunker = Chunker::new(config(16, b"."));
        let chunks = chunker.chunk("First sentence. Second one. Third.");
        assert_eq!(
            texts(&chunks),
            vec!["First sentence.", " Second one.", " Third."]
        );
    }

    #[test]
    fn test_prefix_mode_moves_delimiter_to_next_chunk() {
        let mut cfg = config(8, b"\n");
        cfg.prefix_mode = true;
        let chunker = Chunker::new(cfg);
        let chunks = chunker.chunk("alpha\nbeta\ngamma");
        assert_eq!(texts(&chunks), vec!["alpha", "\nbeta", "\ngamma"]);
    }

    #[test]
    fn test_forward_fallback_finds_late_delimiter() {
        // The S6 shape: no delimiter inside the window, one just past it.
        let chunker = Chunker::new(config(20, b"."));
        let chunks = chunker.chunk("verylongwordwithoutdelimiters. Next sentence.");
        assert_eq!(
            texts(&chunks),
            vec!["verylongwordwithoutdelimiters.", " Next sentence."]
        );
    }

    #[test]
    fn test_without_forward_fallback_hard_splits_at_window() {
        let mut cfg = config(10, b".");
        cfg.forward_fallback = false;
        let chunker = Chunker::new(cfg);
        let chunks = chunker.chunk("abcdefghijklmnopqrst.");
        assert_eq!(texts(&chunks), vec!["abcdefghij", "klmnopqrst", "."]);
    }

    #[test]
    fn test_round_trip_partitions_input_exactly() {
        let input = "The quick brown fox jumps over the lazy dog. \
                     Pack my box with five dozen liquor jugs? \
                     How vexingly quick daft zebras jump!\n\
                     Sphinx of black quartz, judge my vow.";
        for prefix_mode in [false, true] {
            for collapse in [false, true] {
                let chunker = Chunker::new(ChunkerConfig {
                    size: 32,
                    delimiters: b"\n.?".to_vec(),
                    prefix_mode,
                    collapse_consecutive: collapse,
                    forward_fallback: true,
                });
                let chunks = chunker.chunk(input);
                let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
                assert_eq!(rebuilt, input, "prefix={prefix_mode} collapse={collapse}");

                // Offsets are contiguous
                let mut expected_start = 0;
                for chunk in &chunks {
                    assert_eq!(chunk.start_offset, expected_start);
                    expected_start = chunk.end_offset;
                }
                assert_eq!(expected_start, input.len());
            }
        }
    }

    #[test]
    fn test_no_chunk_exceeds_twice_the_target_size() {
        let mut input = "x".repeat(300);
        input.push('.');
        input.push_str(&"y".repeat(95));
        input.push('.');
        let chunker = Chunker::new(config(64, b"."));
        for chunk in chunker.chunk(&input) {
            assert!(
                chunk.text.len() <= 128,
                "chunk of {} bytes exceeds 2x target",
                chunk.text.len()
            );
        }
    }

    #[test]
    fn test_consecutive_delimiters_collapse_into_one_boundary() {
        let mut cfg = config(4, b"\n");
        cfg.collapse_consecutive = true;
        let chunker = Chunker::new(cfg);
        // The delimiter run crosses the window end; collapsing keeps it whole.
        let chunks = chunker.chunk("ab\n\n\n\n\n\ncd");
        assert_eq!(texts(&chunks), vec!["ab\n\n\n\n\n\n", "cd"]);

        let mut plain = config(4, b"\n");
        plain.collapse_consecutive = false;
        let chunker = Chunker::new(plain);
        let chunks = chunker.chunk("ab\n\n\n\n\n\ncd");
        assert_eq!(texts(&chunks), vec!["ab\n\n", "\n\n\n\n", "cd"]);
    }

    #[test]
    fn test_hard_split_respects_utf8_boundaries() {
        let mut cfg = config(5, b".");
        cfg.forward_fallback = false;
        let chunker = Chunker::new(cfg);
        let input = "ééééééé"; // two bytes per char
        let chunks = chunker.chunk(input);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, input);
        for chunk in &chunks {
            assert!(chunk.text.is_char_boundary(0));
        }
    }

    #[test]
    fn test_chunk_pages_carries_page_numbers_and_skips_blank_pages() {
        let chunker = Chunker::new(config(64, b"."));
        let pages = vec![
            (1, "Page one body.".to_string()),
            (2, "   ".to_string()),
            (3, "Page three body.".to_string()),
        ];
        let chunks = chunker.chunk_pages(&pages);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[1].page_number, Some(3));
    }
}
