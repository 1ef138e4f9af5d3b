//! Turn raw receipt bytes into an HTML body or plain text, plus cleaned lines.

use std::path::Path;
use std::sync::OnceLock;

use mailparse::{ParsedMail, parse_mail};
use recap_core::ParseError;
use regex::Regex;
use scraper::Html;
use tracing::debug;

/// Declared format of a raw receipt document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// RFC 822 message (`.eml`).
    Mail,
    Html,
    Text,
    /// PDF bytes; text is extracted before parsing.
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "eml" => Some(DocumentFormat::Mail),
            "html" | "htm" => Some(DocumentFormat::Html),
            "txt" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Raw document as delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// File path or message-derived name; used in errors and fallback receipt ids.
    pub id: String,
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>, format: DocumentFormat) -> Self {
        Self {
            id: id.into(),
            bytes,
            format,
        }
    }

    /// Read a file, picking the format from its extension.
    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let id = path.display().to_string();
        let format = DocumentFormat::from_path(path).ok_or_else(|| ParseError::UnsupportedFormat {
            document: id.clone(),
            extension: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
        })?;
        let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
            document: id.clone(),
            source,
        })?;
        Ok(Self::new(id, bytes, format))
    }
}

/// A document reduced to either markup or text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedDocument {
    /// Markup with `<style>`/`<script>` blocks removed.
    Html(String),
    Text(String),
}

impl NormalizedDocument {
    /// Cleaned, non-empty lines of the document's visible text.
    pub fn lines(&self) -> Vec<String> {
        match self {
            NormalizedDocument::Html(html) => clean_lines(&html_to_plain_text(html)),
            NormalizedDocument::Text(text) => clean_lines(text),
        }
    }
}

pub fn normalize(doc: &SourceDocument) -> Result<NormalizedDocument, ParseError> {
    match doc.format {
        DocumentFormat::Mail => normalize_mail(doc),
        DocumentFormat::Html => Ok(NormalizedDocument::Html(strip_style_and_script(
            &String::from_utf8_lossy(&doc.bytes),
        ))),
        DocumentFormat::Text => Ok(NormalizedDocument::Text(
            String::from_utf8_lossy(&doc.bytes).into_owned(),
        )),
        DocumentFormat::Pdf => {
            let text = pdf_extract::extract_text_from_mem(&doc.bytes).map_err(|e| {
                ParseError::UnreadableDocument {
                    document: doc.id.clone(),
                    reason: format!("PDF text extraction failed: {}", e),
                }
            })?;
            Ok(NormalizedDocument::Text(text))
        }
    }
}

fn normalize_mail(doc: &SourceDocument) -> Result<NormalizedDocument, ParseError> {
    let mail = parse_mail(&doc.bytes).map_err(|e| ParseError::UnreadableDocument {
        document: doc.id.clone(),
        reason: format!("invalid MIME message: {}", e),
    })?;

    if let Some(html) = find_body(&mail, "text/html") {
        debug!(document = %doc.id, "using text/html part");
        return Ok(NormalizedDocument::Html(strip_style_and_script(&html)));
    }
    if let Some(text) = find_body(&mail, "text/plain") {
        debug!(document = %doc.id, "using text/plain part");
        return Ok(NormalizedDocument::Text(text));
    }

    Err(ParseError::UnreadableDocument {
        document: doc.id.clone(),
        reason: "message has no text/html or text/plain part".to_string(),
    })
}

/// Depth-first search for the first part of `mimetype`, decoded with its charset.
fn find_body(mail: &ParsedMail, mimetype: &str) -> Option<String> {
    if mail.subparts.is_empty() && mail.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
        return match mail.get_body() {
            Ok(body) => Some(body),
            Err(_) => mail
                .get_body_raw()
                .ok()
                .map(|raw| String::from_utf8_lossy(&raw).into_owned()),
        };
    }
    mail.subparts.iter().find_map(|part| find_body(part, mimetype))
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("invalid style regex"))
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("invalid script regex"))
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid comment regex"))
}

fn br_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<\s*br\s*/?\s*>").expect("invalid br regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("invalid tag regex"))
}

fn p_content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("invalid p regex"))
}

pub fn strip_style_and_script(html: &str) -> String {
    let without_style = style_re().replace_all(html, " ");
    script_re().replace_all(&without_style, " ").into_owned()
}

/// Flatten markup: comments dropped, `<br>` to newline, other tags to spaces,
/// entities decoded.
pub fn html_to_plain_text(fragment: &str) -> String {
    let value = comment_re().replace_all(fragment, " ");
    let value = br_re().replace_all(&value, "\n");
    let value = tag_re().replace_all(&value, " ");
    decode_entities(&value)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    // The tags are gone, so the fragment parser only has character references left to resolve.
    Html::parse_fragment(text).root_element().text().collect()
}

/// Cleaned lines of every `<p>` element in the fragment, in document order.
pub fn p_text_tokens(fragment: &str) -> Vec<String> {
    p_content_re()
        .captures_iter(fragment)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| clean_lines(&html_to_plain_text(m.as_str())))
        .collect()
}

/// Collapse internal whitespace runs and trim.
pub fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn clean_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(clean_text)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/receipt.EML")), Some(DocumentFormat::Mail));
        assert_eq!(DocumentFormat::from_path(Path::new("r.htm")), Some(DocumentFormat::Html));
        assert_eq!(DocumentFormat::from_path(Path::new("r.pdf")), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_path(Path::new("r.csv")), None);
    }

    #[test]
    fn test_html_to_plain_text() {
        let html = "<div>Tom &amp; Jerry<br/>Line two<!-- hidden --></div><p>x&nbsp;y</p>";
        let lines = clean_lines(&html_to_plain_text(html));
        assert_eq!(lines, vec!["Tom & Jerry", "Line two x y"]);
    }

    #[test]
    fn test_strip_style_and_script() {
        let html = "<style>.a { color: red }</style><p>Keep</p><SCRIPT type=\"x\">var a = 1;</SCRIPT>";
        let stripped = strip_style_and_script(html);
        assert!(!stripped.contains("color"));
        assert!(!stripped.contains("var a"));
        assert!(stripped.contains("<p>Keep</p>"));
    }

    #[test]
    fn test_p_tokens_split_on_br() {
        let html = "<p>First<br>Second</p><div>skip</div><p class=\"x\">  Third  </p>";
        assert_eq!(p_text_tokens(html), vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_mail_prefers_html_part() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: test\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "plain body\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--b1--\r\n",
        );
        let doc = SourceDocument::new("m.eml", raw.as_bytes().to_vec(), DocumentFormat::Mail);
        match normalize(&doc).unwrap() {
            NormalizedDocument::Html(html) => assert!(html.contains("html body")),
            other => panic!("expected html, got {:?}", other),
        }
    }

    #[test]
    fn test_mail_without_text_part_is_unreadable() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Content-Type: image/png\r\n",
            "\r\n",
            "xxxx\r\n",
        );
        let doc = SourceDocument::new("m.eml", raw.as_bytes().to_vec(), DocumentFormat::Mail);
        assert!(matches!(
            normalize(&doc),
            Err(ParseError::UnreadableDocument { .. })
        ));
    }
}
