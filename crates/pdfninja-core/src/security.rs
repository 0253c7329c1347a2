//! Labelling, unlocking and read-only conversion
//!
//! Nothing here encrypts. [`label_protected`] only records a label in the
//! document information dictionary; anyone can still open and edit the file.

use lopdf::Object;
use tracing::info;

use crate::document::PdfDocument;
use crate::error::{Result, Warning};
use crate::optimize::{optimize_with, ProfileSettings};
use crate::parser::parse_with_password;
use crate::progress::Progress;

/// Keyword written alongside a protection label.
pub const LABEL_KEYWORD: &str = "protected-label";

/// Record `label` as the document subject and tag the keywords. This is a
/// metadata flag only and gives no confidentiality.
pub fn label_protected(doc: &PdfDocument, label: &str) -> Result<PdfDocument> {
    let mut out = doc.clone();
    let info = out.info_dictionary_mut()?;
    info.set("Subject", Object::string_literal(label));
    info.set("Keywords", Object::string_literal(LABEL_KEYWORD));
    info!(%label, "labelled document");
    Ok(out)
}

/// Open `bytes` with `password` and drop the security handler. The caller
/// serializes the result to get a file without `/Encrypt`.
pub fn unlock(bytes: &[u8], password: &str) -> Result<PdfDocument> {
    let mut doc = parse_with_password(bytes, password)?;
    doc.inner_mut().trailer.remove(b"Encrypt");
    let removed = doc.prune_unreachable();
    info!(removed, "unlocked document");
    Ok(doc)
}

/// Burn form fields into the page content and drop every annotation that is
/// not a link, so viewers offer nothing to fill in.
pub fn make_read_only(
    doc: &PdfDocument,
    progress: &mut Progress,
) -> Result<(PdfDocument, Vec<Warning>)> {
    let settings = ProfileSettings {
        strip_metadata: false,
        flatten_forms: true,
        remove_annotations: true,
        resample_images: false,
        ..ProfileSettings::default()
    };
    let (out, report) = optimize_with(doc, &settings, progress)?;
    info!(
        flattened = report.flattened_fields,
        removed = report.removed_annotations,
        "made document read-only"
    );
    Ok((out, report.warnings))
}
