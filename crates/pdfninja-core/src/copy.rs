//! Copy pages between object pools
//!
//! Extract, delete and merge all build a fresh document by copying page
//! subtrees into it. The copier:
//! 1. reserves new ids for every selected page up front, so links between
//!    selected pages resolve to the copies
//! 2. writes inheritable attributes onto each copied page, since the copy's
//!    new parent carries none
//! 3. follows references with an explicit worklist, copying each source
//!    object at most once per [`SourceScope`]
//! 4. turns references to unselected pages and `/Pages` nodes into `null`
//!    and never follows a page's `/Parent`

use std::collections::{HashMap, HashSet};

use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::document::{rewrite_references, PdfDocument, RefRewrite};
use crate::error::{ParseError, Result};
use crate::page_index::{PageEntry, INHERITABLE_KEYS};

/// Output document under construction.
pub struct PageCopier {
    out: PdfDocument,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

/// Per-source copy state. Objects shared between pages of the same source
/// are copied once for as long as the scope lives.
pub struct SourceScope<'s> {
    src: &'s PdfDocument,
    tree_nodes: HashSet<ObjectId>,
    memo: HashMap<ObjectId, ObjectId>,
    pending: Vec<ObjectId>,
    copied: usize,
}

impl PageCopier {
    pub fn new(version: &str) -> Result<Self> {
        let out = PdfDocument::empty(version);
        let pages_id = out.pages_root_id()?;
        Ok(Self {
            out,
            pages_id,
            kids: Vec::new(),
        })
    }

    /// Start copying from `src`. `selected` are the pages that will be copied
    /// from it; their ids are reserved immediately.
    pub fn begin<'s>(
        &mut self,
        src: &'s PdfDocument,
        selected: &[&PageEntry],
    ) -> Result<SourceScope<'s>> {
        let mut scope = SourceScope {
            src,
            tree_nodes: page_tree_nodes(src)?,
            memo: HashMap::new(),
            pending: Vec::new(),
            copied: 0,
        };
        for page in selected {
            if !scope.memo.contains_key(&page.id) {
                let new_id = self.out.inner_mut().new_object_id();
                scope.memo.insert(page.id, new_id);
            }
        }
        Ok(scope)
    }

    /// Append a copy of `page` to the output page tree.
    pub fn copy_page(&mut self, scope: &mut SourceScope<'_>, page: &PageEntry) -> Result<ObjectId> {
        let mut dict = scope
            .src
            .inner()
            .get_dictionary(page.id)
            .map_err(|_| {
                ParseError::malformed(format!("page {} is not a dictionary", page.number))
            })?
            .clone();

        dict.remove(b"Parent");
        for key in INHERITABLE_KEYS {
            if let Ok(value) = page.inherited.get(key) {
                dict.set(key.to_vec(), value.clone());
            }
        }

        let new_id = match scope.memo.get(&page.id) {
            Some(id) => *id,
            None => {
                let id = self.out.inner_mut().new_object_id();
                scope.memo.insert(page.id, id);
                id
            }
        };

        let mut object = Object::Dictionary(dict);
        rewrite_references(&mut object, &mut |id| {
            translate(self.out.inner_mut(), scope, id)
        });
        if let Object::Dictionary(dict) = &mut object {
            dict.set("Parent", Object::Reference(self.pages_id));
        }
        self.out.inner_mut().objects.insert(new_id, object);
        self.kids.push(Object::Reference(new_id));

        self.drain(scope);
        Ok(new_id)
    }

    /// Copy an arbitrary object (and everything it references) from the
    /// source. Used for carrying over `/Info`.
    pub fn copy_object(&mut self, scope: &mut SourceScope<'_>, id: ObjectId) -> Option<ObjectId> {
        let new_id = match translate(self.out.inner_mut(), scope, id) {
            RefRewrite::To(new_id) => new_id,
            RefRewrite::Keep | RefRewrite::Null => return None,
        };
        self.drain(scope);
        Some(new_id)
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    pub fn document_mut(&mut self) -> &mut PdfDocument {
        &mut self.out
    }

    /// Close the page tree and hand back the finished document.
    pub fn finish(mut self) -> Result<PdfDocument> {
        let count = self.kids.len() as i64;
        let pages = self
            .out
            .inner_mut()
            .get_object_mut(self.pages_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ParseError::malformed(format!("output page tree: {}", e)))?;
        pages.set("Kids", Object::Array(self.kids));
        pages.set("Count", count);
        Ok(self.out)
    }

    fn drain(&mut self, scope: &mut SourceScope<'_>) {
        while let Some(old_id) = scope.pending.pop() {
            let Some(mut object) = scope.src.inner().objects.get(&old_id).cloned() else {
                continue;
            };
            rewrite_references(&mut object, &mut |id| {
                translate(self.out.inner_mut(), scope, id)
            });
            if let Some(new_id) = scope.memo.get(&old_id) {
                self.out.inner_mut().objects.insert(*new_id, object);
                scope.copied += 1;
            }
        }
    }
}

impl SourceScope<'_> {
    /// Non-page objects copied so far.
    pub fn copied_objects(&self) -> usize {
        self.copied
    }
}

fn translate(out: &mut Document, scope: &mut SourceScope<'_>, id: ObjectId) -> RefRewrite {
    if let Some(new_id) = scope.memo.get(&id) {
        return RefRewrite::To(*new_id);
    }
    if scope.tree_nodes.contains(&id) || !scope.src.inner().objects.contains_key(&id) {
        return RefRewrite::Null;
    }
    let new_id = out.new_object_id();
    scope.memo.insert(id, new_id);
    scope.pending.push(id);
    RefRewrite::To(new_id)
}

/// Every `/Pages` node and page leaf reachable through `/Kids`.
fn page_tree_nodes(doc: &PdfDocument) -> Result<HashSet<ObjectId>> {
    let mut nodes = HashSet::new();
    let mut stack = vec![doc.pages_root_id()?];
    while let Some(id) = stack.pop() {
        if !nodes.insert(id) {
            continue;
        }
        if let Ok(node) = doc.inner().get_dictionary(id) {
            if let Ok(Object::Array(kids)) = node.get(b"Kids") {
                stack.extend(kids.iter().filter_map(|k| k.as_reference().ok()));
            }
        }
    }
    debug!(nodes = nodes.len(), "collected page tree nodes");
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;
    use crate::page_index::page_content;
    use lopdf::dictionary;

    fn copy(doc: &PdfDocument, numbers: &[u32]) -> PdfDocument {
        let index = doc.page_index().unwrap();
        let entries: Vec<&PageEntry> = numbers.iter().map(|n| index.get(*n).unwrap()).collect();
        let mut copier = PageCopier::new(doc.version()).unwrap();
        let mut scope = copier.begin(doc, &entries).unwrap();
        for entry in &entries {
            copier.copy_page(&mut scope, entry).unwrap();
        }
        copier.finish().unwrap()
    }

    #[test]
    fn test_copies_selected_pages_in_order() {
        let doc = fixtures::build(4, "Copy");
        let out = copy(&doc, &[3, 1]);
        out.validate_structure().unwrap();

        let index = out.page_index().unwrap();
        assert_eq!(index.len(), 2);
        let first = String::from_utf8(page_content(&out, index.get(1).unwrap()).unwrap()).unwrap();
        assert!(first.contains("Copy-Page-3"));
    }

    #[test]
    fn test_shared_font_copied_once() {
        let doc = fixtures::build(5, "Font");
        let out = copy(&doc, &[1, 2, 3, 4, 5]);
        let fonts = out
            .inner()
            .objects
            .values()
            .filter(|o| {
                o.as_dict()
                    .and_then(|d| d.get(b"Type"))
                    .and_then(Object::as_name)
                    .map(|name| name == b"Font")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(fonts, 1);
    }

    #[test]
    fn test_links_to_unselected_pages_become_null() {
        let mut doc = fixtures::build(3, "Link");
        let index = doc.page_index().unwrap();
        let first = index.get(1).unwrap().id;
        let second = index.get(2).unwrap().id;
        let third = index.get(3).unwrap().id;
        let inner = doc.inner_mut();
        let to_second = inner.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Dest" => vec![Object::Reference(second), "Fit".into()],
        });
        let to_third = inner.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Dest" => vec![Object::Reference(third), "Fit".into()],
        });
        if let Ok(Object::Dictionary(page)) = inner.get_object_mut(first) {
            page.set(
                "Annots",
                vec![Object::Reference(to_second), Object::Reference(to_third)],
            );
        }

        let out = copy(&doc, &[1, 3]);
        out.validate_structure().unwrap();
        let out_index = out.page_index().unwrap();
        let new_third = out_index.get(2).unwrap().id;

        let mut dests = Vec::new();
        for object in out.inner().objects.values() {
            if let Ok(dict) = object.as_dict() {
                if let Ok(Object::Array(dest)) = dict.get(b"Dest") {
                    dests.push(dest[0].clone());
                }
            }
        }
        assert!(dests.iter().any(|d| matches!(d, Object::Null)));
        assert!(dests
            .iter()
            .any(|d| matches!(d, Object::Reference(id) if *id == new_third)));
    }

    #[test]
    fn test_inherited_resources_are_materialised() {
        let mut doc = fixtures::build(1, "Inherit");
        let root_id = doc.pages_root_id().unwrap();
        let page_id = doc.page_index().unwrap().get(1).unwrap().id;
        let resources = doc
            .inner()
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .clone();
        let inner = doc.inner_mut();
        if let Ok(Object::Dictionary(page)) = inner.get_object_mut(page_id) {
            page.remove(b"Resources");
            page.remove(b"MediaBox");
        }
        if let Ok(Object::Dictionary(root)) = inner.get_object_mut(root_id) {
            root.set("Resources", resources);
            root.set("MediaBox", vec![0.into(), 0.into(), 200.into(), 300.into()]);
        }

        let out = copy(&doc, &[1]);
        let new_page = out.page_index().unwrap().get(1).unwrap().id;
        let dict = out.inner().get_dictionary(new_page).unwrap();
        assert!(dict.has(b"Resources"));
        assert!(dict.has(b"MediaBox"));
        assert_eq!(out.page_index().unwrap().get(1).unwrap().media_box.height(), 300.0);
    }

    #[test]
    fn test_copy_object_carries_info() {
        let doc = fixtures::build(1, "Info");
        let info_id = doc
            .inner()
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .unwrap();
        let mut copier = PageCopier::new("1.7").unwrap();
        let mut scope = copier.begin(&doc, &[]).unwrap();
        let new_id = copier.copy_object(&mut scope, info_id).unwrap();
        assert_eq!(scope.copied_objects(), 1);
        let out = copier.finish().unwrap();
        assert!(out.inner().get_dictionary(new_id).unwrap().has(b"Title"));
    }
}
