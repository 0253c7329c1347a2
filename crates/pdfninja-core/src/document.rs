//! In-memory object model
//!
//! [`PdfDocument`] owns a parsed `lopdf::Document` (object pool, trailer and
//! page tree) and adds the graph-level checks the editing operations rely on:
//! reachability from the trailer and detection of dangling references.

use std::collections::{BTreeSet, VecDeque};

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use serde::Serialize;

use crate::error::{ParseError, Result};
use crate::page_index::PageIndex;

/// Producer string written into documents the engine creates from scratch.
pub const PRODUCER: &str = "PDFNinja";

/// Summary shown next to an uploaded file.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct DocumentMetadata {
    pub version: String,
    pub page_count: u32,
    pub object_count: usize,
    pub encrypted: bool,
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PdfDocument {
    inner: Document,
}

impl PdfDocument {
    pub fn from_lopdf(inner: Document) -> Self {
        Self { inner }
    }

    /// Empty document with a catalog and an empty page tree.
    pub fn empty(version: &str) -> Self {
        let mut doc = Document::with_version(version);
        let pages_id = doc.new_object_id();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => 0,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        let info_id = doc.add_object(lopdf::dictionary! {
            "Producer" => Object::string_literal(PRODUCER),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc.trailer.set("Info", Object::Reference(info_id));
        Self { inner: doc }
    }

    pub fn inner(&self) -> &Document {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Document {
        &mut self.inner
    }

    pub fn into_inner(self) -> Document {
        self.inner
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn object_count(&self) -> usize {
        self.inner.objects.len()
    }

    pub fn catalog_id(&self) -> Result<ObjectId> {
        self.inner
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| ParseError::malformed("trailer has no /Root reference").into())
    }

    pub fn catalog(&self) -> Result<&Dictionary> {
        let id = self.catalog_id()?;
        self.inner
            .get_dictionary(id)
            .map_err(|_| ParseError::malformed(format!("catalog {:?} is not a dictionary", id)).into())
    }

    pub fn pages_root_id(&self) -> Result<ObjectId> {
        self.catalog()?
            .get(b"Pages")
            .and_then(Object::as_reference)
            .map_err(|_| ParseError::malformed("catalog has no /Pages reference").into())
    }

    /// Page list in tree traversal order. Positions are always derived, never stored.
    pub fn page_index(&self) -> Result<PageIndex> {
        PageIndex::build(self)
    }

    pub fn page_count(&self) -> Result<u32> {
        Ok(self.page_index()?.len() as u32)
    }

    /// Resolve an object that may be an indirect reference.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> Option<&'a Object> {
        match object {
            Object::Reference(id) => self.inner.get_object(*id).ok(),
            other => Some(other),
        }
    }

    /// The `/Info` dictionary, whether stored inline or indirectly.
    pub fn info_dictionary(&self) -> Option<&Dictionary> {
        let info = self.inner.trailer.get(b"Info").ok()?;
        match self.resolve(info)? {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Mutable `/Info` dictionary, creating an indirect one when absent.
    pub fn info_dictionary_mut(&mut self) -> Result<&mut Dictionary> {
        let existing = match self.inner.trailer.get(b"Info") {
            Ok(Object::Reference(id))
                if matches!(self.inner.objects.get(id), Some(Object::Dictionary(_))) =>
            {
                Some(*id)
            }
            _ => None,
        };
        let id = match existing {
            Some(id) => id,
            None => {
                let inline = match self.inner.trailer.get(b"Info") {
                    Ok(Object::Dictionary(dict)) => dict.clone(),
                    _ => Dictionary::new(),
                };
                let id = self.inner.add_object(inline);
                self.inner.trailer.set("Info", Object::Reference(id));
                id
            }
        };
        self.inner
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ParseError::malformed(format!("info dictionary: {}", e)).into())
    }

    pub fn metadata(&self) -> Result<DocumentMetadata> {
        let info = self.info_dictionary();
        Ok(DocumentMetadata {
            version: self.inner.version.clone(),
            page_count: self.page_count()?,
            object_count: self.inner.objects.len(),
            encrypted: self.inner.trailer.has(b"Encrypt"),
            title: info.and_then(|d| text_entry(d, b"Title")),
            author: info.and_then(|d| text_entry(d, b"Author")),
        })
    }

    /// Every object reachable from the trailer.
    pub fn reachable_objects(&self) -> BTreeSet<ObjectId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();
        for (_, value) in self.inner.trailer.iter() {
            collect_references(value, &mut |id| queue.push_back(id));
        }
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(object) = self.inner.objects.get(&id) {
                collect_references(object, &mut |child| {
                    if !seen.contains(&child) {
                        queue.push_back(child);
                    }
                });
            }
        }
        seen
    }

    /// References held by live objects (or the trailer) whose target is not in the pool.
    pub fn dangling_references(&self) -> BTreeSet<ObjectId> {
        let mut dangling = BTreeSet::new();
        let mut check = |id: ObjectId| {
            if !self.inner.objects.contains_key(&id) {
                dangling.insert(id);
            }
        };
        for (_, value) in self.inner.trailer.iter() {
            collect_references(value, &mut check);
        }
        for id in self.reachable_objects() {
            if let Some(object) = self.inner.objects.get(&id) {
                collect_references(object, &mut check);
            }
        }
        dangling
    }

    /// Check the structural invariants: the page tree is walkable from the
    /// root and no live reference dangles.
    pub fn validate_structure(&self) -> Result<()> {
        self.page_index()?;
        let dangling = self.dangling_references();
        if let Some(first) = dangling.iter().next() {
            return Err(ParseError::malformed(format!(
                "{} dangling reference(s), first is {} {} R",
                dangling.len(),
                first.0,
                first.1
            ))
            .into());
        }
        Ok(())
    }

    /// Replace every dangling reference with `null`. Readers treat a reference
    /// to a missing object as null anyway; this makes it explicit so the
    /// graph invariant holds after parsing damaged files.
    pub fn null_dangling_references(&mut self) -> usize {
        let dangling = self.dangling_references();
        if dangling.is_empty() {
            return 0;
        }
        let mut replace = |object: &mut Object| {
            rewrite_references(object, &mut |id| {
                if dangling.contains(&id) {
                    RefRewrite::Null
                } else {
                    RefRewrite::Keep
                }
            })
        };
        for object in self.inner.objects.values_mut() {
            replace(object);
        }
        for (_, value) in self.inner.trailer.iter_mut() {
            replace(value);
        }
        dangling.len()
    }

    /// Drop objects not reachable from the trailer. Returns how many were removed.
    pub fn prune_unreachable(&mut self) -> usize {
        let reachable = self.reachable_objects();
        let before = self.inner.objects.len();
        self.inner.objects.retain(|id, _| reachable.contains(id));
        before - self.inner.objects.len()
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let text = decode_text_string(bytes);
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise treated as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Call `visit` for every indirect reference inside `object`.
pub fn collect_references(object: &Object, visit: &mut dyn FnMut(ObjectId)) {
    match object {
        Object::Reference(id) => visit(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, visit);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                collect_references(value, visit);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_references(value, visit);
            }
        }
        _ => {}
    }
}

pub enum RefRewrite {
    Keep,
    To(ObjectId),
    Null,
}

/// Rewrite every indirect reference inside `object` in place.
pub fn rewrite_references(object: &mut Object, map: &mut dyn FnMut(ObjectId) -> RefRewrite) {
    match object {
        Object::Reference(id) => match map(*id) {
            RefRewrite::Keep => {}
            RefRewrite::To(new_id) => *id = new_id,
            RefRewrite::Null => *object = Object::Null,
        },
        Object::Array(items) => {
            for item in items.iter_mut() {
                rewrite_references(item, map);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                rewrite_references(value, map);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                rewrite_references(value, map);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-memory documents shared by the unit tests of every module.

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    use super::PdfDocument;

    /// Content stream text for page `n` of a fixture built with `prefix`.
    pub fn page_text(prefix: &str, n: u32) -> String {
        format!("{}-Page-{}", prefix, n)
    }

    /// `num_pages` pages sharing one Helvetica font, each showing
    /// `<prefix>-Page-<n>`. Pages alternate between Letter and A4 so that
    /// geometry-dependent code sees differing media boxes.
    pub fn build(num_pages: u32, prefix: &str) -> PdfDocument {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids = Vec::new();
        for n in 1..=num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(page_text(prefix, n))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                lopdf::Dictionary::new(),
                content.encode().expect("fixture content encodes"),
            ));
            let media_box: Vec<Object> = if n % 2 == 1 {
                vec![0.into(), 0.into(), 612.into(), 792.into()]
            } else {
                vec![0.into(), 0.into(), 595.into(), 842.into()]
            };
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => media_box,
                "Contents" => Object::Reference(content_id),
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => Object::Reference(font_id) },
                },
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => num_pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(format!("{} title", prefix)),
            "Author" => Object::string_literal("Fixture Author"),
            "Producer" => Object::string_literal("fixture"),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc.trailer.set("Info", Object::Reference(info_id));
        PdfDocument::from_lopdf(doc)
    }

    /// Same document saved with lopdf's classic writer.
    pub fn build_bytes(num_pages: u32, prefix: &str) -> Vec<u8> {
        let mut doc = build(num_pages, prefix).into_inner();
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("fixture saves");
        buffer
    }
}
