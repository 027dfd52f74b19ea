use serde::{Deserialize, Serialize};

/// One source reference attached to an answer, ordered by score descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub document_title: Option<String>,
    pub chunk_index: u32,
    pub section: Option<String>,
    pub page: Option<u32>,
    /// Cosine similarity rounded to three decimals.
    pub score: f32,
}

/// Events of the answer stream, in wire order:
/// `start → token* → citations? → usage → done`, or `start → … → error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        conversation_id: String,
        timestamp: String,
    },
    Status {
        message: String,
    },
    Token {
        text: String,
    },
    Citations {
        items: Vec<Citation>,
    },
    Usage {
        tokens_input: u64,
        tokens_output: u64,
        model: String,
    },
    Done,
    Error {
        message: String,
    },
}

/// Frame an event for the wire: `data: <json>\n\n`. JSON escaping keeps
/// embedded newlines out of the framing.
pub fn encode_sse(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(_) => "data: {\"type\":\"error\",\"message\":\"event serialization failed\"}\n\n".to_string(),
    }
}
