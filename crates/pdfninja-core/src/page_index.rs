//! Logical page list over the page tree
//!
//! Page positions are derived from a depth-first walk of `/Kids` and are
//! recomputed whenever an index is built; nothing stores them.

use std::collections::HashSet;

use lopdf::{Dictionary, Object, ObjectId};

use crate::document::PdfDocument;
use crate::error::{ParseError, Result};

/// US Letter, used when neither the page nor any ancestor declares a media box.
pub const DEFAULT_MEDIA_BOX: Rect = Rect {
    llx: 0.0,
    lly: 0.0,
    urx: 612.0,
    ury: 792.0,
};

/// Attributes a page may inherit from its `/Pages` ancestors.
pub const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl Rect {
    pub fn width(&self) -> f32 {
        (self.urx - self.llx).abs()
    }

    pub fn height(&self) -> f32 {
        (self.ury - self.lly).abs()
    }

    /// Normalised rectangle from a 4-number PDF array.
    pub fn from_object(doc: &PdfDocument, object: &Object) -> Option<Rect> {
        let Object::Array(items) = doc.resolve(object)? else {
            return None;
        };
        if items.len() != 4 {
            return None;
        }
        let mut values = [0f32; 4];
        for (slot, item) in values.iter_mut().zip(items) {
            *slot = number(doc.resolve(item)?)?;
        }
        Some(Rect {
            llx: values[0].min(values[2]),
            lly: values[1].min(values[3]),
            urx: values[0].max(values[2]),
            ury: values[1].max(values[3]),
        })
    }

    pub fn to_object(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.llx),
            Object::Real(self.lly),
            Object::Real(self.urx),
            Object::Real(self.ury),
        ])
    }
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// One leaf of the page tree.
#[derive(Debug, Clone)]
pub struct PageEntry {
    /// 1-based position in traversal order.
    pub number: u32,
    pub id: ObjectId,
    pub media_box: Rect,
    pub rotation: i64,
    /// Inheritable attributes resolved through `/Parent`, nearest ancestor wins.
    pub inherited: Dictionary,
    /// Content stream objects in drawing order.
    pub content_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    pages: Vec<PageEntry>,
}

impl PageIndex {
    pub fn build(doc: &PdfDocument) -> Result<Self> {
        let root = doc.pages_root_id()?;
        let mut walker = Walker {
            doc,
            visited: HashSet::new(),
            pages: Vec::new(),
        };
        walker.walk(root, &Dictionary::new(), 0)?;
        Ok(Self {
            pages: walker.pages,
        })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.pages.iter()
    }

    /// Page by 1-based number.
    pub fn get(&self, number: u32) -> Option<&PageEntry> {
        if number == 0 {
            return None;
        }
        self.pages.get(number as usize - 1)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.pages.iter().map(|p| p.id).collect()
    }

    pub fn contains_id(&self, id: ObjectId) -> bool {
        self.pages.iter().any(|p| p.id == id)
    }
}

struct Walker<'a> {
    doc: &'a PdfDocument,
    visited: HashSet<ObjectId>,
    pages: Vec<PageEntry>,
}

impl Walker<'_> {
    fn walk(&mut self, node_id: ObjectId, inherited: &Dictionary, depth: usize) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(ParseError::malformed("page tree is nested too deeply").into());
        }
        if !self.visited.insert(node_id) {
            return Err(ParseError::malformed(format!(
                "page tree cycle through object {} {} R",
                node_id.0, node_id.1
            ))
            .into());
        }

        let node = self.doc.inner().get_dictionary(node_id).map_err(|_| {
            ParseError::malformed(format!(
                "page tree node {} {} R is missing or not a dictionary",
                node_id.0, node_id.1
            ))
        })?;

        let mut scope = inherited.clone();
        for key in INHERITABLE_KEYS {
            if let Ok(value) = node.get(key) {
                scope.set(key.to_vec(), value.clone());
            }
        }

        // Some producers omit /Type on leaves; a node without /Kids is a page.
        let is_pages = match node.get(b"Type") {
            Ok(Object::Name(name)) => name == b"Pages",
            _ => node.has(b"Kids"),
        };

        if !is_pages {
            self.push_page(node_id, node, scope);
            return Ok(());
        }

        let kids = match node.get(b"Kids").map(|k| self.doc.resolve(k)) {
            Ok(Some(Object::Array(kids))) => kids.clone(),
            _ => {
                return Err(ParseError::malformed(format!(
                    "pages node {} {} R has no /Kids array",
                    node_id.0, node_id.1
                ))
                .into())
            }
        };
        for kid in kids {
            match kid {
                Object::Reference(kid_id) => self.walk(kid_id, &scope, depth + 1)?,
                // Null kids show up in damaged files; they hold no page.
                Object::Null => {}
                other => {
                    return Err(ParseError::malformed(format!(
                        "unexpected /Kids entry {:?}",
                        other
                    ))
                    .into())
                }
            }
        }
        Ok(())
    }

    fn push_page(&mut self, id: ObjectId, node: &Dictionary, inherited: Dictionary) {
        let media_box = inherited
            .get(b"MediaBox")
            .ok()
            .and_then(|mb| Rect::from_object(self.doc, mb))
            .unwrap_or(DEFAULT_MEDIA_BOX);
        let rotation = inherited
            .get(b"Rotate")
            .ok()
            .and_then(|r| self.doc.resolve(r))
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0);
        let content_ids = match node.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.inner().get_object(*id) {
                // Contents may point at an array of streams.
                Ok(Object::Array(items)) => references_in(items),
                _ => vec![*id],
            },
            Ok(Object::Array(items)) => references_in(items),
            _ => Vec::new(),
        };
        self.pages.push(PageEntry {
            number: self.pages.len() as u32 + 1,
            id,
            media_box,
            rotation,
            inherited,
            content_ids,
        });
    }
}

fn references_in(items: &[Object]) -> Vec<ObjectId> {
    items
        .iter()
        .filter_map(|item| item.as_reference().ok())
        .collect()
}

/// Decoded content of a page: every content stream concatenated with a
/// separating newline.
pub fn page_content(doc: &PdfDocument, page: &PageEntry) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for id in &page.content_ids {
        let stream = doc
            .inner()
            .get_object(*id)
            .and_then(Object::as_stream)
            .map_err(|_| {
                ParseError::malformed(format!(
                    "page {} content {} {} R is not a stream",
                    page.number, id.0, id.1
                ))
            })?;
        let bytes = if stream.dict.has(b"Filter") {
            stream.decompressed_content().map_err(|e| {
                ParseError::malformed(format!("page {} content: {}", page.number, e))
            })?
        } else {
            stream.content.clone()
        };
        if !content.is_empty() {
            content.push(b'\n');
        }
        content.extend_from_slice(&bytes);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;
    use lopdf::dictionary;

    #[test]
    fn test_index_follows_kids_order() {
        let doc = fixtures::build(5, "Order");
        let index = doc.page_index().unwrap();
        assert_eq!(index.len(), 5);
        let numbers: Vec<u32> = index.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        for page in index.iter() {
            let text = String::from_utf8(page_content(&doc, page).unwrap()).unwrap();
            assert!(text.contains(&fixtures::page_text("Order", page.number)));
        }
    }

    #[test]
    fn test_media_boxes_are_per_page() {
        let doc = fixtures::build(2, "Sizes");
        let index = doc.page_index().unwrap();
        assert_eq!(index.get(1).unwrap().media_box.width(), 612.0);
        assert_eq!(index.get(2).unwrap().media_box.height(), 842.0);
        assert!(index.get(0).is_none());
        assert!(index.get(3).is_none());
    }

    #[test]
    fn test_inherits_attributes_from_nested_pages_node() {
        let mut doc = fixtures::build(1, "Nested");
        let root_id = doc.pages_root_id().unwrap();
        let page_id = doc.page_index().unwrap().get(1).unwrap().id;

        let inner = doc.inner_mut();
        let middle_id = inner.add_object(dictionary! {
            "Type" => "Pages",
            "Parent" => Object::Reference(root_id),
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
            "Rotate" => 90,
            "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
        });
        if let Ok(Object::Dictionary(root)) = inner.get_object_mut(root_id) {
            root.set("Kids", vec![Object::Reference(middle_id)]);
        }
        if let Ok(Object::Dictionary(page)) = inner.get_object_mut(page_id) {
            page.remove(b"MediaBox");
            page.set("Parent", Object::Reference(middle_id));
        }

        let index = doc.page_index().unwrap();
        let page = index.get(1).unwrap();
        assert_eq!(page.rotation, 90);
        assert_eq!(page.media_box.width(), 300.0);
        assert!(page.inherited.has(b"Resources"));
    }

    #[test]
    fn test_cycle_is_malformed() {
        let mut doc = fixtures::build(1, "Cycle");
        let root_id = doc.pages_root_id().unwrap();
        if let Ok(Object::Dictionary(root)) = doc.inner_mut().get_object_mut(root_id) {
            root.set(
                "Kids",
                vec![Object::Reference(root_id)],
            );
        }
        let err = doc.page_index().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_media_box_defaults_to_letter() {
        let mut doc = fixtures::build(1, "Default");
        let page_id = doc.page_index().unwrap().get(1).unwrap().id;
        if let Ok(Object::Dictionary(page)) = doc.inner_mut().get_object_mut(page_id) {
            page.remove(b"MediaBox");
        }
        let index = doc.page_index().unwrap();
        assert_eq!(index.get(1).unwrap().media_box, DEFAULT_MEDIA_BOX);
    }

    #[test]
    fn test_rect_normalises_corner_order() {
        let doc = fixtures::build(1, "Rect");
        let rect = Rect::from_object(
            &doc,
            &Object::Array(vec![100.into(), 200.into(), 10.into(), Object::Real(20.5)]),
        )
        .unwrap();
        assert_eq!(rect.llx, 10.0);
        assert_eq!(rect.lly, 20.5);
        assert_eq!(rect.width(), 90.0);
    }
}
