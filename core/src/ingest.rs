use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How the text of a document was obtained. Each format has a primary
/// library and a secondary one; recording the method per extraction keeps
/// the fallback chain auditable from logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfPages,
    PdfObjects,
    DocxXml,
    DocxParts,
    XlsxSheets,
    XlsxSharedStrings,
    CsvRows,
    CsvLines,
    HtmlText,
    HtmlDom,
    Utf8,
    Utf8Lossy,
}

/// Normalized output of the format extractor: one UTF-8 string, page and
/// section structure flattened with double newlines.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub filename: String,
    pub mime_type: String,
    pub method: ExtractionMethod,
    pub pages: Option<u32>,
}

/// A plaintext chunk between the chunker and the ingestion pipeline, before
/// embedding and encryption.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub index: u32,
    pub section: Option<String>,
    pub page: Option<u32>,
}

pub trait ContentHash {
    fn content_hash(&self) -> String;
}

impl ContentHash for [u8] {
    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self);
        format!("{:x}", hasher.finalize())
    }
}

impl ContentHash for TextChunk {
    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// SHA-256 digest of a chunk plaintext, stored beside the ciphertext for
/// integrity audits and idempotence checks.
pub fn plaintext_digest(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}
