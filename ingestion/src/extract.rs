use calamine::{Reader, Xlsx};
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::ingest::{ExtractedText, ExtractionMethod};
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// CSV files above this size are rendered as row groups that each repeat the
/// header, so retrieval windows stay self-describing.
const CSV_STREAMING_THRESHOLD: usize = 1024 * 1024;
const CSV_ROWS_PER_GROUP: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("text extraction failed for {mime_type}: {reason}")]
    ExtractionFailed { mime_type: String, reason: String },
}

impl QuarryError for ExtractError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Docx,
    Xlsx,
    Csv,
    Html,
    Markdown,
    Text,
    Unknown,
}

pub fn detect_content_kind(mime_type: &str, filename: Option<&str>) -> ContentKind {
    let mime = mime_type.split(';').next().unwrap_or("").trim().to_lowercase();
    let by_mime = match mime.as_str() {
        "application/pdf" => Some(ContentKind::Pdf),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(ContentKind::Docx)
        }
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(ContentKind::Xlsx)
        }
        "text/csv" => Some(ContentKind::Csv),
        "text/html" | "application/xhtml+xml" => Some(ContentKind::Html),
        "text/markdown" => Some(ContentKind::Markdown),
        "text/plain" => Some(ContentKind::Text),
        _ => None,
    };
    if let Some(kind) = by_mime {
        return kind;
    }

    if let Some(name) = filename {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        return match ext.as_str() {
            "pdf" => ContentKind::Pdf,
            "docx" => ContentKind::Docx,
            "xlsx" => ContentKind::Xlsx,
            "csv" => ContentKind::Csv,
            "html" | "htm" => ContentKind::Html,
            "md" | "markdown" => ContentKind::Markdown,
            "txt" => ContentKind::Text,
            _ => ContentKind::Unknown,
        };
    }

    ContentKind::Unknown
}

/// Extract normalized UTF-8 text from raw document bytes.
///
/// Each format runs its attempt chain in order — primary library, then the
/// next best one, then a last-resort lossy UTF-8 decode; only when every
/// tier produces nothing usable does the document fail extraction.
pub fn extract_text(
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
) -> Result<ExtractedText, ExtractError> {
    let kind = detect_content_kind(mime_type, Some(filename));

    type Attempt = fn(&[u8]) -> Result<String, String>;
    let attempts: &[(ExtractionMethod, Attempt)] = match kind {
        ContentKind::Pdf => &[
            (ExtractionMethod::PdfPages, extract_pdf),
            (ExtractionMethod::PdfObjects, extract_pdf_objects),
        ],
        ContentKind::Docx => &[
            (ExtractionMethod::DocxXml, extract_docx),
            (ExtractionMethod::DocxParts, extract_docx_parts),
        ],
        ContentKind::Xlsx => &[
            (ExtractionMethod::XlsxSheets, extract_xlsx),
            (ExtractionMethod::XlsxSharedStrings, extract_xlsx_shared_strings),
        ],
        ContentKind::Csv => &[
            (ExtractionMethod::CsvRows, extract_csv),
            (ExtractionMethod::CsvLines, extract_csv_lines),
        ],
        ContentKind::Html => &[
            (ExtractionMethod::HtmlText, extract_html),
            (ExtractionMethod::HtmlDom, extract_html_dom),
        ],
        ContentKind::Markdown | ContentKind::Text => {
            &[(ExtractionMethod::Utf8, extract_utf8_strict)]
        }
        ContentKind::Unknown => &[],
    };

    let mut last_reason = if attempts.is_empty() {
        format!("unsupported type {}", mime_type)
    } else {
        String::new()
    };

    let mut extracted: Option<(String, ExtractionMethod)> = None;
    for (method, attempt) in attempts {
        match attempt(bytes) {
            Ok(text) if !text.trim().is_empty() => {
                extracted = Some((text, *method));
                break;
            }
            Ok(_) => {
                warn!(mime_type, filename, tier = ?method, "extractor produced no text, trying next");
                last_reason = "empty output".to_string();
            }
            Err(reason) => {
                warn!(mime_type, filename, tier = ?method, reason = %reason, "extractor failed, trying next");
                last_reason = reason;
            }
        }
    }

    let (text, method) = match extracted {
        Some(hit) => hit,
        None => match utf8_fallback(bytes) {
            Some(text) => (text, ExtractionMethod::Utf8Lossy),
            None => {
                return Err(ExtractError::ExtractionFailed {
                    mime_type: mime_type.to_string(),
                    reason: last_reason,
                })
            }
        },
    };

    debug!(filename, ?method, chars = text.len(), "extracted document text");
    Ok(ExtractedText {
        text,
        filename: filename.to_string(),
        mime_type: mime_type.to_string(),
        method,
        pages: None,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    // pdf-extract concatenates page text itself; pages without an extractable
    // layer contribute nothing.
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => Err("pdf had no extractable text".to_string()),
        Err(e) => Err(format!("pdf parse error: {}", e)),
    }
}

/// Second PDF tier: lopdf walks the object tree directly and tolerates
/// documents whose content streams trip up pdf-extract.
fn extract_pdf_objects(bytes: &[u8]) -> Result<String, String> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| format!("pdf load error: {}", e))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err("pdf has no pages".to_string());
    }

    let text = document
        .extract_text(&pages)
        .map_err(|e| format!("pdf text error: {}", e))?;
    if text.trim().is_empty() {
        return Err("pdf had no extractable text".to_string());
    }
    Ok(text)
}

/// DOCX is a ZIP around WordprocessingML. Paragraph runs (`<w:t>`) join per
/// paragraph; table cells flatten to `cell | cell` rows.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip: {}", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| format!("no document.xml: {}", e))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("document.xml read error: {}", e))?;

    Ok(flatten_wordprocessing_xml(&xml))
}

/// Second DOCX tier: when `document.xml` is missing or unreadable, strip
/// tags from every text-bearing WordprocessingML part in the archive
/// (body, headers, footers, notes).
fn extract_docx_parts(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip: {}", e))?;

    let names: Vec<String> = archive
        .file_names()
        .filter(|name| {
            name.starts_with("word/")
                && name.ends_with(".xml")
                && ["document", "header", "footer", "footnotes", "endnotes"]
                    .iter()
                    .any(|part| name.contains(part))
        })
        .map(|name| name.to_string())
        .collect();

    let mut parts = Vec::new();
    for name in names {
        let mut xml = String::new();
        let readable = archive
            .by_name(&name)
            .ok()
            .and_then(|mut file| file.read_to_string(&mut xml).ok())
            .is_some();
        if !readable {
            continue;
        }
        let text = strip_xml_tags(&xml);
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        return Err("no readable text parts in archive".to_string());
    }
    Ok(parts.join("\n\n"))
}

fn flatten_wordprocessing_xml(xml: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut in_cell = false;
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        current.push_str(if in_text_run { &rest[..open] } else { "" });
        rest = &rest[open..];
        let Some(close) = rest.find('>') else { break };
        let tag = &rest[1..close];
        rest = &rest[close + 1..];

        let name = tag.trim_end_matches('/').split_whitespace().next().unwrap_or("");
        match name {
            "w:t" if !tag.ends_with('/') => in_text_run = true,
            "/w:t" => in_text_run = false,
            "/w:p" => {
                let line = current.trim().to_string();
                if !line.is_empty() {
                    if in_cell {
                        // Cell paragraphs merge into the row below.
                        paragraphs.push(format!("\u{1}{}", line));
                    } else {
                        paragraphs.push(line);
                    }
                }
                current.clear();
            }
            "w:tc" => in_cell = true,
            "/w:tc" => in_cell = false,
            "w:tab" => current.push('\t'),
            "w:br" => current.push('\n'),
            _ => {}
        }
    }

    // Fold marked cell paragraphs into ` | `-joined rows, in document order.
    let mut out: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    for p in paragraphs {
        if let Some(cell) = p.strip_prefix('\u{1}') {
            row.push(cell.to_string());
        } else {
            if !row.is_empty() {
                out.push(row.join(" | "));
                row.clear();
            }
            out.push(p);
        }
    }
    if !row.is_empty() {
        out.push(row.join(" | "));
    }

    out.join("\n\n")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, String> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes.to_vec())).map_err(|e| format!("xlsx open error: {}", e))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for name in sheet_names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| format!("sheet {} read error: {}", name, e))?;

        let mut lines = vec![format!("# {}", name)];
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            if cells.iter().any(|c| !c.trim().is_empty()) {
                lines.push(cells.join(" | "));
            }
        }
        if lines.len() > 1 {
            sheets.push(lines.join("\n"));
        }
    }

    if sheets.is_empty() {
        return Err("workbook had no populated sheets".to_string());
    }
    Ok(sheets.join("\n\n"))
}

/// Second XLSX tier: cell text lives in `xl/sharedStrings.xml`; a plain
/// tag strip recovers it when calamine cannot read the workbook proper.
fn extract_xlsx_shared_strings(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip: {}", e))?;
    let mut xml = String::new();
    archive
        .by_name("xl/sharedStrings.xml")
        .map_err(|e| format!("no sharedStrings.xml: {}", e))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("sharedStrings.xml read error: {}", e))?;

    let text = strip_xml_tags(&xml);
    if text.trim().is_empty() {
        return Err("workbook shared strings were empty".to_string());
    }
    Ok(text)
}

fn extract_csv(bytes: &[u8]) -> Result<String, String> {
    let streaming = bytes.len() > CSV_STREAMING_THRESHOLD;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes);

    let mut rows: Vec<String> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("csv parse error: {}", e))?;
        let cells: Vec<&str> = record.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
        if !cells.is_empty() {
            rows.push(cells.join(" | "));
        }
    }

    render_csv_rows(rows, streaming)
}

/// Second CSV tier: best-effort line splitting on the dominant delimiter,
/// for files whose quoting the strict parser rejects.
fn extract_csv_lines(bytes: &[u8]) -> Result<String, String> {
    let streaming = bytes.len() > CSV_STREAMING_THRESHOLD;
    let text = String::from_utf8_lossy(bytes);

    let first_line = text.lines().next().unwrap_or("");
    let delimiter = [',', ';', '\t']
        .into_iter()
        .max_by_key(|d| first_line.matches(*d).count())
        .unwrap_or(',');

    let rows: Vec<String> = text
        .lines()
        .filter_map(|line| {
            let cells: Vec<&str> = line
                .split(delimiter)
                .map(|c| c.trim().trim_matches('"'))
                .filter(|c| !c.is_empty())
                .collect();
            (!cells.is_empty()).then(|| cells.join(" | "))
        })
        .collect();

    render_csv_rows(rows, streaming)
}

fn render_csv_rows(rows: Vec<String>, streaming: bool) -> Result<String, String> {
    if rows.is_empty() {
        return Err("csv had no rows".to_string());
    }

    if !streaming {
        return Ok(rows.join("\n"));
    }

    // Large files: independent row groups, each prefixed by the header row.
    let header = rows[0].clone();
    let groups: Vec<String> = rows[1..]
        .chunks(CSV_ROWS_PER_GROUP)
        .map(|group| format!("{}\n{}", header, group.join("\n")))
        .collect();
    Ok(groups.join("\n\n"))
}

fn extract_html(bytes: &[u8]) -> Result<String, String> {
    let html = String::from_utf8_lossy(bytes);
    let text = nanohtml2text::html2text(&html);
    if text.trim().is_empty() {
        return Err("html had no text content".to_string());
    }
    Ok(collapse_whitespace(&text))
}

/// Second HTML tier: a DOM walk with scraper, taking every text node whose
/// parent is not a script or style element.
fn extract_html_dom(bytes: &[u8]) -> Result<String, String> {
    let html = String::from_utf8_lossy(bytes);
    let document = scraper::Html::parse_document(&html);

    let mut parts: Vec<String> = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skip = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style")))
            .unwrap_or(false);
        if !skip && !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }

    if parts.is_empty() {
        return Err("html had no text content".to_string());
    }
    Ok(collapse_whitespace(&parts.join(" ")))
}

fn extract_utf8_strict(bytes: &[u8]) -> Result<String, String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| "invalid utf-8".to_string())
}

/// Drop markup, keep character data, decode the standard entities. Both
/// archive-based secondary tiers share this.
fn strip_xml_tags(xml: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in xml.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(collapsed);
    }
    lines.join("\n").trim().to_string()
}

fn utf8_fallback(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return Some(String::new());
    }
    let text = String::from_utf8_lossy(bytes);
    let total = text.chars().count();
    let usable = text
        .chars()
        .filter(|c| (!c.is_control() || c.is_whitespace()) && *c != '\u{FFFD}')
        .count();
    if (usable as f64) / (total as f64) < 0.7 {
        return None;
    }
    Some(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_detection_prefers_mime_then_extension() {
        assert_eq!(detect_content_kind("application/pdf", None), ContentKind::Pdf);
        assert_eq!(
            detect_content_kind("application/octet-stream", Some("report.xlsx")),
            ContentKind::Xlsx
        );
        assert_eq!(
            detect_content_kind("text/plain; charset=utf-8", Some("notes.bin")),
            ContentKind::Text
        );
        assert_eq!(detect_content_kind("application/octet-stream", None), ContentKind::Unknown);
    }

    #[test]
    fn plain_text_extracts_verbatim() {
        let out = extract_text(b"hello world", "text/plain", "a.txt").unwrap();
        assert_eq!(out.text, "hello world");
        assert_eq!(out.method, ExtractionMethod::Utf8);
    }

    #[test]
    fn invalid_utf8_falls_back_to_lossy() {
        let mut bytes = b"mostly text ".to_vec();
        bytes.push(0xFF);
        let out = extract_text(&bytes, "text/plain", "a.txt").unwrap();
        assert_eq!(out.method, ExtractionMethod::Utf8Lossy);
        assert!(out.text.starts_with("mostly text"));
    }

    #[test]
    fn csv_rows_join_cells_with_pipes() {
        let csv = b"name,role\nada,engineer\n";
        let out = extract_text(csv, "text/csv", "team.csv").unwrap();
        assert_eq!(out.text, "name | role\nada | engineer");
        assert_eq!(out.method, ExtractionMethod::CsvRows);
    }

    #[test]
    fn large_csv_repeats_header_per_group() {
        let mut csv = String::from("id,value\n");
        for i in 0..CSV_ROWS_PER_GROUP + 5 {
            csv.push_str(&format!("{},payload-{}\n", i, i));
        }
        // Pad past the streaming threshold.
        while csv.len() <= CSV_STREAMING_THRESHOLD {
            csv.push_str("filler,filler-value-padding-padding-padding\n");
        }

        let out = extract_text(csv.as_bytes(), "text/csv", "big.csv").unwrap();
        let headers = out.text.matches("id | value").count();
        assert!(headers > 1, "expected repeated headers, got {}", headers);
    }

    #[test]
    fn html_drops_markup_and_collapses_whitespace() {
        let html = b"<html><head><style>p{color:red}</style></head><body><p>Hello   <b>there</b></p><script>alert(1)</script></body></html>";
        let out = extract_text(html, "text/html", "page.html").unwrap();
        assert!(out.text.contains("Hello"));
        assert!(out.text.contains("there"));
        assert!(!out.text.contains("alert"));
        assert!(!out.text.contains("color:red"));
    }

    #[test]
    fn docx_paragraphs_and_tables_flatten() {
        let xml = r#"<?xml version="1.0"?>
<w:document><w:body>
<w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Second </w:t></w:r><w:r><w:t>joined.</w:t></w:r></w:p>
<w:tbl><w:tr>
<w:tc><w:p><w:r><w:t>cell a</w:t></w:r></w:p></w:tc>
<w:tc><w:p><w:r><w:t>cell b</w:t></w:r></w:p></w:tc>
</w:tr></w:tbl>
</w:body></w:document>"#;
        let text = flatten_wordprocessing_xml(xml);
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second joined."));
        assert!(text.contains("cell a | cell b"));
    }

    #[test]
    fn binary_garbage_fails_extraction() {
        let bytes: Vec<u8> = (0..255u8).cycle().take(4096).collect();
        let err = extract_text(&bytes, "application/octet-stream", "blob.bin");
        assert!(err.is_err());
    }

    #[test]
    fn mislabeled_pdf_runs_the_whole_chain_to_lossy_utf8() {
        // Both PDF libraries reject this; the text itself survives via the
        // last-resort decode.
        let out = extract_text(
            b"plain notes that were uploaded with the wrong extension",
            "application/pdf",
            "notes.pdf",
        )
        .unwrap();
        assert_eq!(out.method, ExtractionMethod::Utf8Lossy);
        assert!(out.text.contains("wrong extension"));
    }

    #[test]
    fn ragged_csv_falls_back_to_line_splitting() {
        // Strict parsing rejects the unequal row lengths; the second tier
        // still recovers every cell.
        let csv = b"a,b\nc\nd,e,f\n";
        let out = extract_text(csv, "text/csv", "ragged.csv").unwrap();
        assert_eq!(out.method, ExtractionMethod::CsvLines);
        assert_eq!(out.text, "a | b\nc\nd | e | f");
    }

    #[test]
    fn docx_without_document_xml_reads_other_parts() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("word/header1.xml", options).unwrap();
            std::io::Write::write_all(
                &mut writer,
                b"<w:hdr><w:p><w:r><w:t>Quarterly header text</w:t></w:r></w:p></w:hdr>",
            )
            .unwrap();
            writer.finish().unwrap();
        }

        let out = extract_text(
            buffer.get_ref(),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "broken.docx",
        )
        .unwrap();
        assert_eq!(out.method, ExtractionMethod::DocxParts);
        assert!(out.text.contains("Quarterly header text"));
    }

    #[test]
    fn html_dom_tier_skips_scripts_and_styles() {
        let html = b"<html><body><p>visible words</p><script>var hidden = 1;</script><style>.x{}</style></body></html>";
        let text = extract_html_dom(html).unwrap();
        assert!(text.contains("visible words"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains(".x{}"));
    }

    #[test]
    fn xml_tag_strip_keeps_character_data() {
        let xml = r#"<sst><si><t>first cell</t></si><si><t>second &amp; third</t></si></sst>"#;
        assert_eq!(strip_xml_tags(xml), "first cell second & third");
    }
}
