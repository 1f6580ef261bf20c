//! Attachment content extraction.
//!
//! Attachments are classified by filename extension, not by the declared
//! MIME type. Text-capable formats become plain text; images become `data:`
//! URIs. Every failure is reported as [`ExtractResult::Unsupported`] so one
//! bad attachment never aborts the rest of the message. Parsing happens in
//! memory; nothing is staged on disk.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::pipeline::types::ExtractResult;

/// Formats extracted as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Pdf,
    Docx,
}

/// How an attachment is handled, decided from its filename alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text(TextFormat),
    /// Image with its MIME type.
    Image(&'static str),
    Other,
}

impl AttachmentKind {
    /// Classify by case-insensitive extension.
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("txt") => Self::Text(TextFormat::Plain),
            Some("pdf") => Self::Text(TextFormat::Pdf),
            Some("docx") => Self::Text(TextFormat::Docx),
            Some("png") => Self::Image("image/png"),
            Some("jpg" | "jpeg") => Self::Image("image/jpeg"),
            Some("webp") => Self::Image("image/webp"),
            _ => Self::Other,
        }
    }
}

/// Extract text or an image reference from one attachment.
pub fn extract(filename: &str, bytes: &[u8]) -> ExtractResult {
    match AttachmentKind::from_filename(filename) {
        AttachmentKind::Text(format) => match extract_text(format, bytes) {
            Ok(text) => ExtractResult::Text(text),
            Err(reason) => ExtractResult::Unsupported(reason),
        },
        AttachmentKind::Image(mime) => ExtractResult::Image(image_data_uri(mime, bytes)),
        AttachmentKind::Other => ExtractResult::Unsupported("unsupported extension".into()),
    }
}

fn extract_text(format: TextFormat, bytes: &[u8]) -> Result<String, String> {
    match format {
        TextFormat::Plain => Ok(decode_text_lossy(bytes)),
        TextFormat::Pdf => pdf_text(bytes),
        TextFormat::Docx => docx_text(bytes),
    }
}

/// Decode bytes as UTF-8, dropping undecodable sequences.
pub fn decode_text_lossy(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// `data:<mime>;base64,<payload>`
pub fn image_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

// ── PDF ─────────────────────────────────────────────────────────────

/// Text of every page that yields any, newline-joined. Pages without
/// extractable text (scans) contribute nothing.
///
/// lopdf asserts on some malformed inputs; a panic is an unreadable PDF.
fn pdf_text(bytes: &[u8]) -> Result<String, String> {
    std::panic::catch_unwind(|| pdf_pages_text(bytes))
        .unwrap_or_else(|_| Err("PDF parser panicked on malformed input".into()))
}

fn pdf_pages_text(bytes: &[u8]) -> Result<String, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("PDF parse failed: {e}"))?;

    let pages: Vec<String> = doc
        .get_pages()
        .keys()
        .filter_map(|&page| doc.extract_text(&[page]).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    Ok(pages.join("\n"))
}

// ── DOCX ────────────────────────────────────────────────────────────

const DOCX_BODY: &str = "word/document.xml";

/// Paragraph text in document order, newline-joined.
fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("DOCX is not a zip: {e}"))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| format!("DOCX missing {DOCX_BODY}: {e}"))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("DOCX body unreadable: {e}"))?;

    Ok(docx_paragraphs(&xml).join("\n"))
}

fn paragraph_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<w:p(?:\s[^>]*)?/>|<w:p(?:\s[^>]*)?>.*?</w:p>").expect("valid paragraph regex")
    })
}

fn properties_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?s)<w:pPr>.*?</w:pPr>").expect("valid properties regex"))
}

fn run_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:(tab|br|cr)(?:\s[^>]*)?/>")
            .expect("valid run regex")
    })
}

/// Split WordprocessingML into paragraph strings.
fn docx_paragraphs(xml: &str) -> Vec<String> {
    paragraph_regex()
        .find_iter(xml)
        .map(|para| {
            // Tab stops live in paragraph properties; only runs carry text.
            let runs = properties_regex().replace_all(para.as_str(), "");
            run_regex()
                .captures_iter(&runs)
                .map(|cap| match (cap.get(1), cap.get(2).map(|m| m.as_str())) {
                    (Some(text), _) => unescape_xml(text.as_str()),
                    (None, Some("tab")) => "\t".to_string(),
                    (None, Some(_)) => "\n".to_string(),
                    (None, None) => String::new(),
                })
                .collect()
        })
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
