//! Bytes to [`PdfDocument`]
//!
//! lopdf does the tokenising and xref reconstruction, following the `/Prev`
//! chain so the newest trailer of an incrementally updated file wins. This
//! module classifies failures and enforces the graph invariants afterwards.

use lopdf::{Document, Object};
use tracing::{debug, info, warn};

use crate::document::PdfDocument;
use crate::error::{ParseError, Result};

const HEADER: &[u8] = b"%PDF-";
/// Smallest byte count that can hold a header, one object and a trailer.
const MIN_DOCUMENT_BYTES: usize = 64;
/// How far into the buffer a header may start. Some producers prepend junk.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Parse a document, opening it with the empty password if it is encrypted.
pub fn parse(bytes: &[u8]) -> Result<PdfDocument> {
    parse_with_password(bytes, "")
}

pub fn parse_with_password(bytes: &[u8], password: &str) -> Result<PdfDocument> {
    check_header(bytes)?;
    let revisions = count_revisions(bytes);
    debug!(bytes = bytes.len(), revisions, "parsing document");

    let mut inner = Document::load_mem(bytes).map_err(|e| {
        if contains(bytes, b"/Encrypt") {
            ParseError::unsupported(format!("encrypted document could not be loaded: {}", e))
        } else {
            ParseError::malformed(e.to_string())
        }
    })?;

    if inner.trailer.has(b"Encrypt") {
        decrypt(&mut inner, password)?;
        info!("decrypted document");
    }

    let mut doc = PdfDocument::from_lopdf(inner);
    doc.page_index()?;
    let nulled = doc.null_dangling_references();
    if nulled > 0 {
        warn!(nulled, "replaced dangling references with null");
    }
    doc.validate_structure()?;

    debug!(
        version = %doc.version(),
        objects = doc.object_count(),
        "parsed document"
    );
    Ok(doc)
}

/// Only the standard security handler is understood. lopdf resolves
/// `/Encrypt` through a reference, so a direct dictionary is moved into an
/// object of its own first.
fn decrypt(inner: &mut Document, password: &str) -> Result<()> {
    let encrypt = match inner.trailer.get(b"Encrypt") {
        Ok(Object::Reference(id)) => inner.get_dictionary(*id).ok().cloned(),
        Ok(Object::Dictionary(dict)) => Some(dict.clone()),
        _ => None,
    }
    .ok_or_else(|| ParseError::unsupported("unreadable /Encrypt entry"))?;

    let handler = encrypt.get(b"Filter").and_then(Object::as_name).unwrap_or_default();
    if handler != b"Standard" {
        return Err(ParseError::unsupported(format!(
            "unknown security handler /{}",
            String::from_utf8_lossy(handler)
        ))
        .into());
    }
    if !matches!(inner.trailer.get(b"Encrypt"), Ok(Object::Reference(_))) {
        let id = inner.add_object(Object::Dictionary(encrypt));
        inner.trailer.set("Encrypt", Object::Reference(id));
    }

    inner.decrypt(password).map_err(|e| {
        ParseError::unsupported(format!("cannot remove document encryption: {}", e))
    })?;
    inner.trailer.remove(b"Encrypt");
    Ok(())
}

fn check_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < MIN_DOCUMENT_BYTES {
        return Err(ParseError::malformed(format!(
            "{} bytes is too small to be a PDF",
            bytes.len()
        ))
        .into());
    }
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    if !contains(window, HEADER) {
        return Err(ParseError::malformed("missing %PDF- header").into());
    }
    Ok(())
}

/// Number of `startxref` markers: 1 for a plain file, one more per
/// incremental update.
pub fn count_revisions(bytes: &[u8]) -> usize {
    bytes
        .windows(b"startxref".len())
        .filter(|w| *w == b"startxref")
        .count()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
