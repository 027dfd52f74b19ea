const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";
/// Bytes held back when a fragment might end inside a split tag.
const LOOKAHEAD: usize = 10;

/// Streaming filter that drops `<think> … </think>` blocks from model
/// output while preserving everything around them.
///
/// Two states: outside a block, text is emitted except for a small tail
/// that could still turn out to open a tag; inside, everything is discarded
/// until the closing tag. Tags are matched case-insensitively and may be
/// split across any number of fragments.
pub struct ThinkTagFilter {
    inside: bool,
    buffer: String,
}

impl ThinkTagFilter {
    pub fn new() -> Self {
        Self {
            inside: false,
            buffer: String::new(),
        }
    }

    /// Feed one provider fragment; returns the text safe to emit now.
    pub fn push(&mut self, fragment: &str) -> String {
        self.buffer.push_str(fragment);
        let mut out = String::new();

        loop {
            if self.inside {
                match find_ascii_ci(&self.buffer, CLOSE_TAG) {
                    Some(at) => {
                        self.buffer.drain(..at + CLOSE_TAG.len());
                        self.inside = false;
                    }
                    None => {
                        // Drop consumed thinking, keep only a possible
                        // partial closing tag.
                        let keep = partial_tail(&self.buffer, CLOSE_TAG);
                        self.buffer.drain(..self.buffer.len() - keep);
                        break;
                    }
                }
            } else {
                match find_ascii_ci(&self.buffer, OPEN_TAG) {
                    Some(at) => {
                        out.push_str(&self.buffer[..at]);
                        self.buffer.drain(..at + OPEN_TAG.len());
                        self.inside = true;
                    }
                    None => {
                        let hold = held_back_len(&self.buffer);
                        let emit_to = self.buffer.len() - hold;
                        out.push_str(&self.buffer[..emit_to]);
                        self.buffer.drain(..emit_to);
                        break;
                    }
                }
            }
        }

        out
    }

    /// Flush at end of stream. An unterminated block stays dropped.
    pub fn finish(&mut self) -> String {
        if self.inside {
            self.buffer.clear();
            return String::new();
        }
        std::mem::take(&mut self.buffer)
    }
}

impl Default for ThinkTagFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// How much of the buffer tail must be withheld because it could be the
/// beginning of an opening tag.
fn held_back_len(buffer: &str) -> usize {
    let tail_start = buffer.len().saturating_sub(LOOKAHEAD);
    let tail_start = ceil_char_boundary(buffer, tail_start);
    match buffer[tail_start..].rfind('<') {
        Some(rel) => {
            let at = tail_start + rel;
            let candidate = &buffer[at..];
            if is_prefix_ci(candidate, OPEN_TAG) {
                buffer.len() - at
            } else {
                0
            }
        }
        None => 0,
    }
}

/// Longest suffix of `buffer` that is a proper case-insensitive prefix of
/// `tag`.
fn partial_tail(buffer: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(buffer.len());
    for n in (1..=max).rev() {
        let start = buffer.len() - n;
        if !buffer.is_char_boundary(start) {
            continue;
        }
        if is_prefix_ci(&buffer[start..], tag) {
            return n;
        }
    }
    0
}

fn is_prefix_ci(candidate: &str, tag: &str) -> bool {
    let len = candidate.len().min(tag.len());
    candidate.as_bytes()[..len].eq_ignore_ascii_case(&tag.as_bytes()[..len])
}

/// Case-insensitive search for an ASCII needle. A hit always lands on a
/// char boundary because the needle starts with `<`.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn ceil_char_boundary(text: &str, mut at: usize) -> usize {
    while at < text.len() && !text.is_char_boundary(at) {
        at += 1;
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fragments: &[&str]) -> String {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for fragment in fragments {
            out.push_str(&filter.push(fragment));
        }
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn passthrough_without_tags() {
        assert_eq!(run(&["Hello ", "world."]), "Hello world.");
    }

    #[test]
    fn drops_complete_block_in_one_fragment() {
        assert_eq!(run(&["Before <think>hidden</think>after"]), "Before after");
    }

    #[test]
    fn drops_block_split_across_fragments() {
        assert_eq!(
            run(&["Before <th", "ink>hid", "den</th", "ink>after"]),
            "Before after"
        );
    }

    #[test]
    fn tag_split_byte_by_byte() {
        let fragments: Vec<String> = "A<think>x</think>B".chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = fragments.iter().map(|s| s.as_str()).collect();
        assert_eq!(run(&refs), "AB");
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(run(&["a<THINK>x</Think>b"]), "ab");
    }

    #[test]
    fn lone_angle_bracket_is_not_swallowed() {
        assert_eq!(run(&["2 < 3 and 5 > 4"]), "2 < 3 and 5 > 4");
    }

    #[test]
    fn html_like_tags_pass_through() {
        assert_eq!(run(&["use <b>bold</b> text"]), "use <b>bold</b> text");
    }

    #[test]
    fn unterminated_block_is_discarded() {
        assert_eq!(run(&["visible <think>never closed"]), "visible ");
    }

    #[test]
    fn multiple_blocks_are_all_removed() {
        assert_eq!(
            run(&["a<think>1</think>b<think>2</think>c"]),
            "abc"
        );
    }

    #[test]
    fn trailing_partial_open_is_held_until_resolved() {
        let mut filter = ThinkTagFilter::new();
        let first = filter.push("answer <thi");
        // The ambiguous tail must not be emitted yet.
        assert_eq!(first, "answer ");
        let second = filter.push("ng> rest");
        assert_eq!(second, "<thing> rest");
    }

    #[test]
    fn long_thinking_content_does_not_accumulate() {
        let mut filter = ThinkTagFilter::new();
        filter.push("<think>");
        for _ in 0..1000 {
            filter.push("some very long reasoning fragment ");
        }
        assert!(filter.buffer.len() < 16);
        let out = filter.push("</think>done");
        assert_eq!(out, "done");
    }
}
