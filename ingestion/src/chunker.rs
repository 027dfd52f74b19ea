use crate::adaptive::{classify, DocumentProfile};
use quarry_core::config::ChunkingConfig;
use quarry_core::ingest::TextChunk;
use tracing::{debug, warn};

/// Token budgets are approximated in characters at this ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Boundary classes tried best-first when closing a chunk. Within a class
/// the latest match inside the size window wins.
const SEPARATOR_LADDER: &[&[&str]] = &[
    &["\n\n\n"],
    &["\n\n"],
    &["\n# ", "\n## ", "\n### "],
    &["\n- ", "\n* ", "\n1. "],
    &["\n"],
    &[". ", "! ", "? "],
    &["; "],
    &[" "],
];

const SENTENCE_STARTS: &[&str] = &[". ", "! ", "? ", "\n"];

#[derive(Debug, Clone)]
pub struct ChunkerSettings {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    pub adaptive: bool,
}

impl ChunkerSettings {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            chunk_chars: config.chunk_size_tokens * CHARS_PER_TOKEN,
            overlap_chars: config.overlap_tokens * CHARS_PER_TOKEN,
            adaptive: config.adaptive,
        }
    }
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            chunk_chars: 800 * CHARS_PER_TOKEN,
            overlap_chars: 150 * CHARS_PER_TOKEN,
            adaptive: false,
        }
    }
}

/// Splits extracted text into overlapping windows at the best available
/// boundary, producing dense 0-based indices.
pub struct Chunker {
    settings: ChunkerSettings,
}

impl Chunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self { settings }
    }

    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let (size, overlap, section) = if self.settings.adaptive {
            let profile = classify(text);
            match profile.window() {
                Some((chunk_tokens, overlap_tokens)) => {
                    debug!(profile = profile.label(), "adaptive chunking window selected");
                    (
                        chunk_tokens * CHARS_PER_TOKEN,
                        overlap_tokens * CHARS_PER_TOKEN,
                        Some(profile.label().to_string()),
                    )
                }
                None => (
                    self.settings.chunk_chars,
                    self.settings.overlap_chars,
                    Some(DocumentProfile::Generic.label().to_string()),
                ),
            }
        } else {
            (self.settings.chunk_chars, self.settings.overlap_chars, None)
        };

        split_with_overlap(text, size, overlap)
            .into_iter()
            .enumerate()
            .map(|(i, body)| TextChunk {
                text: body,
                index: i as u32,
                section: section.clone(),
                page: None,
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerSettings::default())
    }
}

/// Core windowed split. Sizes are in characters; every produced span is
/// non-blank and at most `size * 1.25` long, and consecutive spans share at
/// least one character whenever `overlap > 0`.
fn split_with_overlap(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(4);
    let min_len = size / 4;
    let max_len = size + size / 4;

    // The overlap must stay below the minimum chunk length or windows stop
    // advancing; mirror that by shrinking oversized overlaps.
    let overlap = if overlap >= min_len {
        let reduced = min_len.saturating_sub(1);
        warn!(overlap, reduced, "chunk overlap exceeds minimum window, reducing");
        reduced
    } else {
        overlap
    };

    // Char-index arithmetic with byte offsets for slicing.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    let slice = |from: usize, to: usize| &text[offsets[from]..offsets[to]];
    let byte_to_char = |byte: usize| -> usize {
        match offsets.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    };

    let mut spans: Vec<String> = Vec::new();
    let mut start = 0usize;

    while start < total {
        let remaining = total - start;
        if remaining <= max_len {
            let body = slice(start, total);
            if !body.trim().is_empty() {
                spans.push(body.to_string());
            }
            break;
        }

        let window_lo = start + min_len;
        let window_hi = start + max_len;
        let window = slice(window_lo, window_hi);

        let mut cut = start + size;
        for class in SEPARATOR_LADDER {
            let best_end = class
                .iter()
                .filter_map(|sep| window.rfind(sep).map(|at| at + sep.len()))
                .max();
            if let Some(rel_end) = best_end {
                // Separator bytes are ASCII, so the end lands on a char
                // boundary of the full text.
                cut = byte_to_char(offsets[window_lo] + rel_end);
                break;
            }
        }

        let body = slice(start, cut);
        if !body.trim().is_empty() {
            spans.push(body.to_string());
        }

        start = next_start(text, &offsets, byte_to_char, start, cut, overlap);
    }

    spans
}

/// Back up `overlap` characters from the cut, then advance to the first
/// sentence start inside the overlap window so the shared region does not
/// begin mid-sentence.
fn next_start(
    text: &str,
    offsets: &[usize],
    byte_to_char: impl Fn(usize) -> usize,
    start: usize,
    cut: usize,
    overlap: usize,
) -> usize {
    if overlap == 0 || cut - start <= overlap {
        return cut.max(start + 1);
    }

    let backed_up = cut - overlap;
    let window = &text[offsets[backed_up]..offsets[cut]];

    let sentence_start = SENTENCE_STARTS
        .iter()
        .filter_map(|sep| window.find(sep).map(|at| at + sep.len()))
        .min()
        .map(|rel| byte_to_char(offsets[backed_up] + rel))
        .filter(|&candidate| candidate < cut);

    let next = sentence_start.unwrap_or(backed_up);
    if next <= start {
        cut.max(start + 1)
    } else {
        next
    }
}
