//! recap-ingest: receipt documents (mail, HTML, text, PDF) to `ParsedReceipt`.

pub mod amount;
pub mod fields;
pub mod html;
pub mod normalize;
pub mod patterns;
pub mod source;
pub mod text;

use std::path::Path;

use recap_core::{ParseError, ParsedReceipt};
use tracing::info;

pub use html::parse_receipt_html;
pub use normalize::{DocumentFormat, NormalizedDocument, SourceDocument, normalize};
pub use source::{DirectorySource, DocumentSource, FetchedDocument, MemorySource};
pub use text::parse_receipt_text;

/// Normalize a document and run the extractor that fits its content.
pub fn parse_document(
    doc: &SourceDocument,
    default_currency: &str,
) -> Result<ParsedReceipt, ParseError> {
    let receipt = match normalize(doc)? {
        NormalizedDocument::Html(body) => parse_receipt_html(&body, &doc.id, default_currency)?,
        NormalizedDocument::Text(text) => parse_receipt_text(&text, &doc.id, default_currency)?,
    };
    info!(
        document = %doc.id,
        receipt_id = %receipt.receipt_id,
        items = receipt.subscriptions.len(),
        "parsed receipt"
    );
    Ok(receipt)
}

pub fn parse_receipt_file(path: &Path, default_currency: &str) -> Result<ParsedReceipt, ParseError> {
    parse_document(&SourceDocument::from_path(path)?, default_currency)
}
