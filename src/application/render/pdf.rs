//! PDF capability used by the pipeline: open, merge, split and overlay pages.
//!
//! This is deliberately thin. It never interprets page content; it only moves
//! page objects between `lopdf` documents and wraps footers as form XObjects.

use std::{collections::BTreeSet, path::Path};

use lopdf::{Dictionary, Document as LoDocument, Object, ObjectId, Stream, dictionary};

use super::error::MergeError;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_PAGE_KEYS: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// A page of a [`Document`], addressed by its 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub number: usize,
    id: ObjectId,
}

/// An ordered sequence of pages owned by a single pipeline invocation.
#[derive(Debug, Clone)]
pub struct Document {
    inner: LoDocument,
}

impl Document {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MergeError> {
        Self::checked(LoDocument::load_mem(bytes)?)
    }

    pub fn open(path: &Path) -> Result<Self, MergeError> {
        Self::checked(LoDocument::load(path)?)
    }

    fn checked(inner: LoDocument) -> Result<Self, MergeError> {
        if inner.is_encrypted() {
            return Err(MergeError::Encrypted);
        }
        Ok(Self { inner })
    }

    pub fn page_count(&self) -> usize {
        self.inner.get_pages().len()
    }

    fn page_ids(&self) -> Vec<ObjectId> {
        self.inner.get_pages().into_values().collect()
    }

    /// Every page in order. Walks the page tree once.
    pub fn pages(&self) -> Vec<PageRef> {
        self.page_ids()
            .into_iter()
            .zip(1..)
            .map(|(id, number)| PageRef { number, id })
            .collect()
    }

    /// Decoded content stream of the page at `index` (zero based).
    pub fn page_content(&self, index: usize) -> Result<Vec<u8>, MergeError> {
        let page_id = self
            .page_ids()
            .get(index)
            .copied()
            .ok_or_else(|| MergeError::malformed(format!("page index {index} out of range")))?;
        Ok(self.inner.get_page_content(page_id)?)
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, MergeError> {
        self.inner.prune_objects();
        self.inner.compress();
        let mut out = Vec::new();
        self.inner.save_to(&mut out)?;
        Ok(out)
    }

    /// Split into single-page documents, preserving page order.
    pub fn split_pages(&self) -> Result<Vec<Vec<u8>>, MergeError> {
        self.page_ids()
            .into_iter()
            .map(|page_id| self.extract_page(page_id))
            .collect()
    }

    /// Copies only the objects reachable from the page, never the rest of
    /// the source document.
    fn extract_page(&self, page_id: ObjectId) -> Result<Vec<u8>, MergeError> {
        let mut page = self
            .inner
            .get_object(page_id)
            .and_then(Object::as_dict)?
            .clone();
        for (key, value) in inherited_attributes(&self.inner, page_id)? {
            page.set(key, value);
        }
        page.remove(b"Parent");

        let mut single = LoDocument::with_version(self.inner.version.clone());
        for id in referenced_objects(&self.inner, &page) {
            if let Ok(object) = self.inner.get_object(id) {
                single.objects.insert(id, object.clone());
            }
        }
        single.max_id = self.inner.max_id;

        let pages_id = single.new_object_id();
        single.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        page.set("Parent", Object::Reference(pages_id));
        single.objects.insert(page_id, Object::Dictionary(page));

        let catalog_id = single.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        single.trailer.set("Root", catalog_id);

        Self { inner: single }.into_bytes()
    }

    /// Draw the first page of `footer` over `page`, as listed by [`Self::pages`].
    ///
    /// On error the target page may hold unused imported objects but its
    /// visible content is unchanged.
    pub fn overlay_page(&mut self, page: PageRef, footer: &Document) -> Result<(), String> {
        let page_id = page.id;
        let is_page = self
            .inner
            .get_object(page_id)
            .and_then(Object::as_dict)
            .is_ok_and(|dict| dict.has_type(b"Page"));
        if !is_page {
            return Err(format!("page {} is not part of this document", page.number));
        }

        let mut overlay = footer.inner.clone();
        let first_page = |doc: &LoDocument| doc.get_pages().into_values().next();
        let overlay_page_id = first_page(&overlay).ok_or("footer document has no pages")?;
        flatten_inherited(&mut overlay, overlay_page_id).map_err(|err| err.to_string())?;

        overlay.renumber_objects_with(self.inner.max_id + 1);
        let overlay_page_id = first_page(&overlay).ok_or("footer document has no pages")?;
        let overlay_page = overlay
            .get_object(overlay_page_id)
            .and_then(Object::as_dict)
            .map_err(|err| err.to_string())?
            .clone();
        let overlay_content = overlay
            .get_page_content(overlay_page_id)
            .map_err(|err| err.to_string())?;
        let overlay_resources = overlay_page
            .get(b"Resources")
            .cloned()
            .unwrap_or_else(|_| Object::Dictionary(Dictionary::new()));

        self.inner.max_id = self.inner.max_id.max(overlay.max_id);
        self.inner.objects.extend(overlay.objects);

        let form_id = self.inner.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => Object::Array(page_box(&overlay_page)),
                "Resources" => overlay_resources,
            },
            overlay_content,
        ));

        flatten_inherited(&mut self.inner, page_id).map_err(|err| err.to_string())?;
        let target = self
            .inner
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|err| err.to_string())?
            .clone();
        let mut resources = resolve_dict(&self.inner, target.get(b"Resources").ok());
        let mut xobjects = resolve_dict(&self.inner, resources.get(b"XObject").ok());
        let form_name = format!("RpFooter{}", page.number);
        xobjects.set(form_name.as_bytes().to_vec(), Object::Reference(form_id));
        resources.set("XObject", Object::Dictionary(xobjects));

        let existing = self
            .inner
            .get_page_content(page_id)
            .map_err(|err| err.to_string())?;
        let mut content = Vec::with_capacity(existing.len() + 48);
        content.extend_from_slice(b"q\n");
        content.extend_from_slice(&existing);
        content.extend_from_slice(format!("\nQ\nq /{form_name} Do Q\n").as_bytes());
        let content_id = self.inner.add_object(Stream::new(dictionary! {}, content));

        let target = page_dict_mut(&mut self.inner, page_id).map_err(|err| err.to_string())?;
        target.set("Resources", Object::Dictionary(resources));
        target.set("Contents", Object::Reference(content_id));
        Ok(())
    }
}

/// Accumulates pages from many documents into one, in append order.
pub struct DocumentBuilder {
    doc: LoDocument,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Append every page of `source`, returning how many were added.
    pub fn append(&mut self, source: Document) -> Result<usize, MergeError> {
        let mut src = source.inner;
        for page_id in src.get_pages().into_values().collect::<Vec<_>>() {
            flatten_inherited(&mut src, page_id)?;
        }

        src.renumber_objects_with(self.doc.max_id + 1);
        let page_ids: Vec<ObjectId> = src.get_pages().into_values().collect();
        self.doc.max_id = self.doc.max_id.max(src.max_id);
        self.doc.objects.extend(src.objects);

        for page_id in &page_ids {
            page_dict_mut(&mut self.doc, *page_id)?.set("Parent", Object::Reference(self.pages_id));
            self.kids.push(Object::Reference(*page_id));
        }
        Ok(page_ids.len())
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    pub fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        // Source catalogs and page trees are unreachable from here on.
        self.doc.prune_objects();
        Document { inner: self.doc }
    }
}

fn page_dict_mut(doc: &mut LoDocument, page_id: ObjectId) -> Result<&mut Dictionary, MergeError> {
    Ok(doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?)
}

/// Copy inheritable attributes from the page tree onto the page itself so the
/// page can be re-parented without losing its resources or geometry.
fn flatten_inherited(doc: &mut LoDocument, page_id: ObjectId) -> Result<(), MergeError> {
    let inherited = inherited_attributes(doc, page_id)?;
    if inherited.is_empty() {
        return Ok(());
    }
    let page = page_dict_mut(doc, page_id)?;
    for (key, value) in inherited {
        page.set(key, value);
    }
    Ok(())
}

/// Inheritable attributes the page lacks, resolved from its ancestors.
fn inherited_attributes(
    doc: &LoDocument,
    page_id: ObjectId,
) -> Result<Vec<(Vec<u8>, Object)>, MergeError> {
    let page = doc.get_object(page_id).and_then(Object::as_dict)?;
    let mut missing: Vec<&[u8]> = INHERITABLE_PAGE_KEYS
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut inherited = Vec::new();

    let mut depth = 0;
    while let Some(parent_id) = parent {
        if missing.is_empty() {
            break;
        }
        if depth == MAX_PAGE_TREE_DEPTH {
            return Err(MergeError::malformed("page tree is too deep or cyclic"));
        }
        let node = doc.get_object(parent_id).and_then(Object::as_dict)?;
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    Ok(inherited)
}

/// Objects reachable from `root` without climbing back up through `Parent`.
fn referenced_objects(doc: &LoDocument, root: &Dictionary) -> BTreeSet<ObjectId> {
    let mut seen = BTreeSet::new();
    let mut pending = Vec::new();
    push_dict_references(root, &mut pending);
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Ok(object) = doc.get_object(id) {
            push_references(object, &mut pending);
        }
    }
    seen
}

fn push_references(object: &Object, pending: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => pending.push(*id),
        Object::Array(items) => items.iter().for_each(|item| push_references(item, pending)),
        Object::Dictionary(dict) => push_dict_references(dict, pending),
        Object::Stream(stream) => push_dict_references(&stream.dict, pending),
        _ => {}
    }
}

fn push_dict_references(dict: &Dictionary, pending: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            push_references(value, pending);
        }
    }
}

fn resolve_dict(doc: &LoDocument, object: Option<&Object>) -> Dictionary {
    match object {
        Some(Object::Dictionary(dict)) => dict.clone(),
        Some(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(Object::as_dict)
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

fn page_box(page: &Dictionary) -> Vec<Object> {
    for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
        if let Ok(values) = page.get(key).and_then(Object::as_array) {
            return values.clone();
        }
    }
    [0, 0, 612, 792].into_iter().map(Object::Integer).collect()
}
