//! Page-level structural edits
//!
//! Every operation reads its inputs and builds new documents through
//! [`PageCopier`], so a failed call leaves the caller's documents as they
//! were.

use lopdf::Object;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::copy::PageCopier;
use crate::document::PdfDocument;
use crate::error::{Result, ValidationError};
use crate::page_index::{PageEntry, PageIndex};
use crate::progress::{marks, Progress, Stage};
use crate::ranges::PageSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    /// One document holding every selected page in selection order.
    #[default]
    Single,
    /// One single-page document per selected page.
    Separate,
}

#[derive(Debug)]
pub enum Extracted {
    Single(PdfDocument),
    /// `(source page number, document)` in selection order.
    Separate(Vec<(u32, PdfDocument)>),
}

impl Extracted {
    pub fn documents(&self) -> Vec<&PdfDocument> {
        match self {
            Extracted::Single(doc) => vec![doc],
            Extracted::Separate(docs) => docs.iter().map(|(_, doc)| doc).collect(),
        }
    }
}

/// Copy the selected pages out of `doc`, keeping selection order.
pub fn extract(
    doc: &PdfDocument,
    selection: &PageSelection,
    mode: ExtractMode,
    progress: &mut Progress,
) -> Result<Extracted> {
    if selection.is_empty() {
        return Err(ValidationError::EmptySelection.into());
    }
    let index = doc.page_index()?;
    let total = index.len() as u32;
    selection.validate(total)?;
    let entries = entries_for(&index, selection.pages());

    info!(pages = entries.len(), total, ?mode, "extracting pages");
    let extracted = match mode {
        ExtractMode::Single => Extracted::Single(copy_pages(doc, &entries, progress)?),
        ExtractMode::Separate => {
            let mut outputs = Vec::with_capacity(entries.len());
            for (done, entry) in entries.iter().enumerate() {
                let mut copier = PageCopier::new(doc.version())?;
                let mut scope = copier.begin(doc, &[*entry])?;
                copier.copy_page(&mut scope, entry)?;
                outputs.push((entry.number, copier.finish()?));
                progress.step(
                    Stage::Editing,
                    marks::EDITING,
                    marks::SERIALIZING,
                    done + 1,
                    entries.len(),
                );
            }
            Extracted::Separate(outputs)
        }
    };
    Ok(extracted)
}

/// Remove the selected pages. The source `/Info` dictionary is kept.
///
/// An empty selection yields an unchanged copy; selecting every page fails
/// with [`ValidationError::WouldEmptyDocument`] before anything is built.
pub fn delete_pages(
    doc: &PdfDocument,
    selection: &PageSelection,
    progress: &mut Progress,
) -> Result<PdfDocument> {
    let index = doc.page_index()?;
    let total = index.len() as u32;
    selection.validate(total)?;

    let keep = selection.sorted().complement(total);
    if keep.is_empty() {
        return Err(ValidationError::WouldEmptyDocument {
            selected: selection.len(),
            total,
        }
        .into());
    }
    info!(deleted = selection.len(), kept = keep.len(), "deleting pages");

    let entries = entries_for(&index, keep.pages());
    let mut copier = PageCopier::new(doc.version())?;
    let mut scope = copier.begin(doc, &entries)?;
    for (done, entry) in entries.iter().enumerate() {
        copier.copy_page(&mut scope, entry)?;
        progress.step(
            Stage::Editing,
            marks::EDITING,
            marks::SERIALIZING,
            done + 1,
            entries.len(),
        );
    }

    let source_info = doc.inner().trailer.get(b"Info").and_then(Object::as_reference);
    if let Ok(info_id) = source_info {
        if let Some(new_info) = copier.copy_object(&mut scope, info_id) {
            copier
                .document_mut()
                .inner_mut()
                .trailer
                .set("Info", Object::Reference(new_info));
        }
    }
    debug!(objects = scope.copied_objects(), "copied shared objects");
    let mut out = copier.finish()?;
    out.prune_unreachable();
    Ok(out)
}

/// Concatenate every page of `docs` in order. Each input's resources stay
/// with its own pages.
pub fn merge(docs: &[PdfDocument], progress: &mut Progress) -> Result<PdfDocument> {
    if docs.is_empty() {
        return Err(ValidationError::NoInputFiles.into());
    }

    let indexes = docs
        .iter()
        .map(PdfDocument::page_index)
        .collect::<Result<Vec<_>>>()?;
    let total: usize = indexes.iter().map(|i| i.len()).sum();
    let version = docs
        .iter()
        .map(PdfDocument::version)
        .max()
        .unwrap_or("1.7");
    info!(inputs = docs.len(), pages = total, "merging documents");

    let mut copier = PageCopier::new(version)?;
    let mut done = 0;
    for (doc, index) in docs.iter().zip(&indexes) {
        let entries: Vec<&PageEntry> = index.iter().collect();
        let mut scope = copier.begin(doc, &entries)?;
        for entry in &entries {
            copier.copy_page(&mut scope, entry)?;
            done += 1;
            progress.step(Stage::Editing, marks::EDITING, marks::SERIALIZING, done, total);
        }
    }
    copier.finish()
}

fn copy_pages(
    doc: &PdfDocument,
    entries: &[&PageEntry],
    progress: &mut Progress,
) -> Result<PdfDocument> {
    let mut copier = PageCopier::new(doc.version())?;
    let mut scope = copier.begin(doc, entries)?;
    for (done, entry) in entries.iter().enumerate() {
        copier.copy_page(&mut scope, entry)?;
        progress.step(
            Stage::Editing,
            marks::EDITING,
            marks::SERIALIZING,
            done + 1,
            entries.len(),
        );
    }
    copier.finish()
}

fn entries_for<'i>(index: &'i PageIndex, pages: &[u32]) -> Vec<&'i PageEntry> {
    pages.iter().filter_map(|n| index.get(*n)).collect()
}

/// File name for an extraction output: `<stem>_extracted.pdf` for a single
/// document, `<stem>_page_<n>.pdf` per page otherwise.
pub fn extracted_file_name(stem: &str, page: Option<u32>) -> String {
    match page {
        Some(n) => format!("{}_page_{}.pdf", stem, n),
        None => format!("{}_extracted.pdf", stem),
    }
}
