//! Character-window chunker with boundary snapping

use serde::{Deserialize, Serialize};

/// Hard limits on the chunk window, applied by [`ChunkOptions::clamped`]
const MIN_CHUNK_SIZE: usize = 100;
const MAX_CHUNK_SIZE: usize = 5_000;
const MAX_OVERLAP: usize = 500;

/// Chunk window configuration, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Target window size
    pub size: usize,
    /// Characters shared between consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            size: 1_200,
            overlap: 200,
        }
    }
}

impl ChunkOptions {
    /// Clamp size to [100, 5000] and overlap to [0, min(size, 500)]
    pub fn clamped(self) -> Self {
        let size = self.size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        let overlap = self.overlap.min(size.min(MAX_OVERLAP));
        Self { size, overlap }
    }
}

/// A chunk produced by the splitter, before analysis and persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDraft {
    /// Dense 0-based position within the document
    pub index: usize,
    /// The chunk text
    pub text: String,
    /// Character offset of the first character (inclusive)
    pub char_start: usize,
    /// Character offset past the last character (exclusive)
    pub char_end: usize,
}

/// Splits document text into overlapping chunks
///
/// The whole text is held in memory; the output is a finite sequence that
/// can be regenerated from the same input and options.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    options: ChunkOptions,
}

impl Chunker {
    /// Create a chunker with the given options, clamping them to the
    /// supported ranges
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            options: options.clamped(),
        }
    }

    /// The effective (clamped) options
    pub const fn options(&self) -> ChunkOptions {
        self.options
    }

    /// Split `text` into chunks in document order
    ///
    /// Returns an empty vector for empty input; callers treat that as the
    /// empty-content failure upstream.
    pub fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let ChunkOptions { size, overlap } = self.options;
        let mut drafts = Vec::new();
        let mut start = 0usize;

        loop {
            let window_end = (start.saturating_add(size)).min(total);
            let end = if window_end == total {
                // Final window swallows the remainder; no snapping
                total
            } else {
                // A split must leave room to make progress past the overlap
                let min_end = start
                    .saturating_add((size / 2).max(overlap.saturating_add(1)))
                    .min(window_end);
                find_split(&chars, start, window_end, min_end)
            };

            drafts.push(ChunkDraft {
                index: drafts.len(),
                text: chars
                    .get(start..end)
                    .map(|s| s.iter().collect())
                    .unwrap_or_default(),
                char_start: start,
                char_end: end,
            });

            if end >= total {
                break;
            }
            start = end.saturating_sub(overlap);
        }

        drafts
    }
}

/// Pick the split position inside `[min_end, window_end]`
///
/// Preference order: last paragraph break, last sentence end, hard cut at
/// the window edge.
fn find_split(chars: &[char], start: usize, window_end: usize, min_end: usize) -> usize {
    if let Some(end) = last_paragraph_break(chars, start, window_end) {
        if end >= min_end {
            return end;
        }
    }
    if let Some(end) = last_sentence_end(chars, start, window_end) {
        if end >= min_end {
            return end;
        }
    }
    window_end
}

/// Position just past the last blank line ("\n\n") in the window, if any
fn last_paragraph_break(chars: &[char], start: usize, window_end: usize) -> Option<usize> {
    let mut found = None;
    let mut i = start.saturating_add(1);
    while i < window_end {
        if chars.get(i) == Some(&'\n') && chars.get(i.saturating_sub(1)) == Some(&'\n') {
            found = Some(i.saturating_add(1));
        }
        i = i.saturating_add(1);
    }
    found
}

/// Position just past the last sentence-ending punctuation followed by
/// whitespace in the window, if any
fn last_sentence_end(chars: &[char], start: usize, window_end: usize) -> Option<usize> {
    let mut found = None;
    let mut i = start;
    while i.saturating_add(1) < window_end {
        let c = chars.get(i);
        let next = chars.get(i.saturating_add(1));
        if matches!(c, Some('.' | '!' | '?')) && next.is_some_and(|n| n.is_whitespace()) {
            found = Some(i.saturating_add(1));
        }
        i = i.saturating_add(1);
    }
    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkOptions { size, overlap })
    }

    #[test]
    fn test_short_input_yields_single_chunk() {
        let text = "a".repeat(99);
        let drafts = chunker(100, 0).chunk(&text);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].index, 0);
        assert_eq!(drafts[0].char_start, 0);
        assert_eq!(drafts[0].char_end, 99);
        assert_eq!(drafts[0].text, text);
    }

    #[test]
    fn test_half_overlap_produces_expected_windows() {
        // 2500 chars with size 1000 / overlap 500 steps by 500:
        // [0,1000) [500,1500) [1000,2000) [1500,2500)
        let text = "x".repeat(2500);
        let drafts = chunker(1000, 500).chunk(&text);

        assert_eq!(drafts.len(), 4);
        let indices: Vec<usize> = drafts.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(drafts[0].char_start, 0);
        assert_eq!(drafts[3].char_end, 2500);
    }

    #[test]
    fn test_default_options_on_plain_ascii() {
        // 2400 chars with size 1000 / overlap 200 steps by 800:
        // [0,1000) [800,1800) [1600,2400)
        let text = "y".repeat(2400);
        let drafts = chunker(1000, 200).chunk(&text);

        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[1].char_start, 800);
        assert_eq!(drafts[2].char_end, 2400);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let mut text = "p".repeat(800);
        text.push_str("\n\n");
        text.push_str(&"q".repeat(600));
        let drafts = chunker(1000, 0).chunk(&text);

        assert!(drafts[0].text.ends_with("\n\n"));
        assert_eq!(drafts[0].char_end, 802);
        assert!(drafts[1].text.starts_with('q'));
    }

    #[test]
    fn test_prefers_sentence_end_without_paragraphs() {
        let mut text = "s".repeat(700);
        text.push_str(". ");
        text.push_str(&"t".repeat(600));
        let drafts = chunker(1000, 0).chunk(&text);

        assert!(drafts[0].text.ends_with('.'));
        assert_eq!(drafts[0].char_end, 701);
    }

    #[test]
    fn test_early_boundary_is_ignored() {
        // The only paragraph break sits before the window midpoint, so the
        // splitter must fall through to a hard cut rather than produce a
        // degenerate chunk.
        let mut text = "a".repeat(100);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(1500));
        let drafts = chunker(1000, 0).chunk(&text);

        assert_eq!(drafts[0].char_end, 1000);
    }

    #[test]
    fn test_indices_dense_and_ordered() {
        let text = "lorem ipsum dolor sit amet. ".repeat(400);
        let drafts = chunker(500, 100).chunk(&text);

        for (i, draft) in drafts.iter().enumerate() {
            assert_eq!(draft.index, i);
        }
        for pair in drafts.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end, "chunks must overlap");
            assert!(pair[1].char_end > pair[0].char_end, "chunks must advance");
        }
        assert_eq!(drafts.last().unwrap().char_end, text.chars().count());
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunker(1000, 200).chunk("").is_empty());
    }

    #[test]
    fn test_options_clamping() {
        let clamped = ChunkOptions {
            size: 50,
            overlap: 900,
        }
        .clamped();
        assert_eq!(clamped.size, 100);
        assert_eq!(clamped.overlap, 100);

        let clamped = ChunkOptions {
            size: 9_000,
            overlap: 900,
        }
        .clamped();
        assert_eq!(clamped.size, 5_000);
        assert_eq!(clamped.overlap, 500);
    }

    #[test]
    fn test_multibyte_text_is_split_safely() {
        let text = "héllo wörld. ".repeat(200);
        let drafts = chunker(500, 100).chunk(&text);

        let total: usize = text.chars().count();
        assert_eq!(drafts.last().unwrap().char_end, total);
        for draft in &drafts {
            assert_eq!(draft.text.chars().count(), draft.char_end - draft.char_start);
        }
    }

    #[test]
    fn test_restartable_same_output() {
        let text = "sentence one. sentence two. ".repeat(300);
        let c = chunker(800, 150);
        assert_eq!(c.chunk(&text), c.chunk(&text));
    }
}
