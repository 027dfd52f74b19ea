/// Total context above this many characters triggers per-chunk truncation;
/// sized to stay inside the completion providers' input budgets.
const CONTEXT_BUDGET_CHARS: usize = 12_000;
const TRUNCATED_CHUNK_CHARS: usize = 400;
const CHUNK_DELIMITER: &str = "\n---\n";

/// A decrypted retrieval hit plus the document metadata needed for
/// prompting and citations.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub document_title: Option<String>,
    pub mime_type: Option<String>,
    pub chunk_index: u32,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub similarity: f32,
    pub text: String,
}

impl RetrievedChunk {
    fn title(&self) -> String {
        self.document_title
            .clone()
            .unwrap_or_else(|| format!("Document {}", short_id(&self.document_id)))
    }
}

/// Render retrieved chunks for the model: grouped by source document with a
/// `[doc:…]` header per group, each chunk prefixed by its match strength.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
    let truncate = total > CONTEXT_BUDGET_CHARS;

    let mut groups: Vec<(&str, Vec<&RetrievedChunk>)> = Vec::new();
    for chunk in chunks {
        match groups.iter_mut().find(|(id, _)| *id == chunk.document_id) {
            Some((_, members)) => members.push(chunk),
            None => groups.push((&chunk.document_id, vec![chunk])),
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (document_id, members) in groups {
        let first = members[0];
        let mime = first.mime_type.as_deref().unwrap_or("unknown");
        let header = format!("[doc:{} — {} ({})]", short_id(document_id), first.title(), mime);

        let bodies: Vec<String> = members
            .iter()
            .map(|chunk| {
                let body = if truncate {
                    truncate_chars(&chunk.text, TRUNCATED_CHUNK_CHARS)
                } else {
                    chunk.text.clone()
                };
                format!("({:.0}% match) {}", chunk.similarity * 100.0, body)
            })
            .collect();

        out.push(format!("{}\n{}", header, bodies.join(CHUNK_DELIMITER)));
    }

    out.join("\n\n")
}

pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(at, _)| at)
        .unwrap_or(id.len());
    &id[..end]
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((at, _)) => format!("{}…", &text[..at]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, index: u32, score: f32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            document_id: doc.to_string(),
            document_title: Some(format!("{} title", doc)),
            mime_type: Some("text/plain".to_string()),
            chunk_index: index,
            section: None,
            page: None,
            similarity: score,
            text: text.to_string(),
        }
    }

    #[test]
    fn chunks_group_by_document_in_score_order() {
        let chunks = vec![
            chunk("doc-aaaa-1111", 0, 0.91, "first"),
            chunk("doc-bbbb-2222", 3, 0.80, "second"),
            chunk("doc-aaaa-1111", 2, 0.75, "third"),
        ];
        let context = build_context(&chunks);

        // Two groups, the first document's header appears once.
        assert_eq!(context.matches("[doc:doc-aaaa").count(), 1);
        assert_eq!(context.matches("[doc:doc-bbbb").count(), 1);
        let first_group = context.find("doc-aaaa").unwrap();
        let second_group = context.find("doc-bbbb").unwrap();
        assert!(first_group < second_group);
        assert!(context.contains("(91% match) first"));
    }

    #[test]
    fn small_context_is_not_truncated() {
        let chunks = vec![chunk("doc-1", 0, 0.9, &"x".repeat(500))];
        let context = build_context(&chunks);
        assert!(context.contains(&"x".repeat(500)));
    }

    #[test]
    fn oversized_context_truncates_each_chunk() {
        let chunks: Vec<RetrievedChunk> = (0..8)
            .map(|i| chunk("doc-1", i, 0.9, &"y".repeat(2000)))
            .collect();
        let context = build_context(&chunks);
        assert!(!context.contains(&"y".repeat(500)));
        assert!(context.contains('…'));
    }

    #[test]
    fn missing_title_falls_back_to_short_id() {
        let mut c = chunk("abcdefgh-rest-of-uuid", 0, 0.5, "body");
        c.document_title = None;
        let context = build_context(&[c]);
        assert!(context.contains("Document abcdefgh"));
    }
}
