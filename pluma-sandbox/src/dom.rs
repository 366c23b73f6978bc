//! Minimal host DOM model: elements, live style declarations and a document
//! with the usual `html > head, body` skeleton.
//!
//! Plugin-rendered fragments are tagged with [`SANDBOX_ATTRIBUTE`] so the
//! membrane can tell which subtrees a given plugin owns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::value::ObjectId;

/// Attribute carrying the owning plugin id on a plugin-rendered fragment root.
pub const SANDBOX_ATTRIBUTE: &str = "data-plugin-sandbox";

/// Inline style declaration of an element. Shared by reference, so a
/// mutation through any handle is visible to every other handle.
pub struct StyleDeclaration {
    id: ObjectId,
    props: RwLock<BTreeMap<String, String>>,
}

pub type StyleRef = Arc<StyleDeclaration>;

impl StyleDeclaration {
    fn new() -> StyleRef {
        Arc::new(Self {
            id: ObjectId::next(),
            props: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn get_property(&self, name: &str) -> Option<String> {
        self.props.read().unwrap().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: &str) {
        self.props
            .write()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_property(&self, name: &str) -> Option<String> {
        self.props.write().unwrap().remove(name)
    }

    /// Serialized form, e.g. `color: red; width: 10px;`.
    pub fn css_text(&self) -> String {
        self.props
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| format!("{k}: {v};"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for StyleDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleDeclaration")
            .field("id", &self.id)
            .field("css_text", &self.css_text())
            .finish()
    }
}

/// A DOM element.
pub struct Element {
    id: ObjectId,
    tag_name: String,
    attributes: RwLock<BTreeMap<String, String>>,
    style: StyleRef,
    text: RwLock<String>,
    parent: RwLock<Weak<Element>>,
    children: RwLock<Vec<ElementRef>>,
}

pub type ElementRef = Arc<Element>;

impl Element {
    /// Creates a detached element. Tag names are stored lower-case.
    pub fn new(tag_name: &str) -> ElementRef {
        Arc::new(Self {
            id: ObjectId::next(),
            tag_name: tag_name.to_ascii_lowercase(),
            attributes: RwLock::new(BTreeMap::new()),
            style: StyleDeclaration::new(),
            text: RwLock::new(String::new()),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.read().unwrap().get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .write()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<String> {
        self.attributes.write().unwrap().remove(name)
    }

    pub fn style(&self) -> StyleRef {
        Arc::clone(&self.style)
    }

    pub fn text_content(&self) -> String {
        self.text.read().unwrap().clone()
    }

    pub fn set_text_content(&self, text: &str) {
        *self.text.write().unwrap() = text.to_string();
    }

    pub fn parent(&self) -> Option<ElementRef> {
        self.parent.read().unwrap().upgrade()
    }

    pub fn children(&self) -> Vec<ElementRef> {
        self.children.read().unwrap().clone()
    }

    /// Appends `child`, detaching it from any previous parent first.
    ///
    /// Returns `false` and leaves the tree untouched when `child` is this
    /// element or one of its ancestors, since the append would close a cycle.
    pub fn append_child(self: &Arc<Self>, child: &ElementRef) -> bool {
        if self.ancestors_inclusive().any(|el| Arc::ptr_eq(&el, child)) {
            return false;
        }
        if let Some(old_parent) = child.parent() {
            old_parent
                .children
                .write()
                .unwrap()
                .retain(|c| !Arc::ptr_eq(c, child));
        }
        *child.parent.write().unwrap() = Arc::downgrade(self);
        self.children.write().unwrap().push(Arc::clone(child));
        true
    }

    pub fn remove_child(&self, child: &ElementRef) -> bool {
        let mut children = self.children.write().unwrap();
        let before = children.len();
        children.retain(|c| !Arc::ptr_eq(c, child));
        let removed = children.len() != before;
        if removed {
            *child.parent.write().unwrap() = Weak::new();
        }
        removed
    }

    /// Walks from this element up to the root, starting with the element itself.
    pub fn ancestors_inclusive(self: &Arc<Self>) -> impl Iterator<Item = ElementRef> {
        let mut next = Some(Arc::clone(self));
        std::iter::from_fn(move || {
            let current = next.take()?;
            next = current.parent();
            Some(current)
        })
    }

    /// Nearest inclusive ancestor whose `attr` equals `value`.
    pub fn closest_with_attribute(self: &Arc<Self>, attr: &str, value: &str) -> Option<ElementRef> {
        self.ancestors_inclusive()
            .find(|el| el.attribute(attr).as_deref() == Some(value))
    }

    /// Depth-first search of this subtree for an element with the given `id` attribute.
    pub fn find_by_dom_id(self: &Arc<Self>, dom_id: &str) -> Option<ElementRef> {
        if self.attribute("id").as_deref() == Some(dom_id) {
            return Some(Arc::clone(self));
        }
        self.children()
            .iter()
            .find_map(|child| child.find_by_dom_id(dom_id))
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("tag_name", &self.tag_name)
            .field("attributes", &*self.attributes.read().unwrap())
            .finish()
    }
}

/// The host document.
#[derive(Debug)]
pub struct Document {
    id: ObjectId,
    root: ElementRef,
    head: ElementRef,
    body: ElementRef,
}

pub type DocumentRef = Arc<Document>;

impl Document {
    pub fn new() -> DocumentRef {
        let root = Element::new("html");
        let head = Element::new("head");
        let body = Element::new("body");
        root.append_child(&head);
        root.append_child(&body);
        Arc::new(Self {
            id: ObjectId::next(),
            root,
            head,
            body,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn document_element(&self) -> ElementRef {
        Arc::clone(&self.root)
    }

    pub fn head(&self) -> ElementRef {
        Arc::clone(&self.head)
    }

    pub fn body(&self) -> ElementRef {
        Arc::clone(&self.body)
    }

    pub fn create_element(&self, tag_name: &str) -> ElementRef {
        Element::new(tag_name)
    }

    pub fn get_element_by_id(&self, dom_id: &str) -> Option<ElementRef> {
        self.root.find_by_dom_id(dom_id)
    }

    /// True for the document root, head and body.
    pub fn is_structural(&self, element: &ElementRef) -> bool {
        Arc::ptr_eq(element, &self.root)
            || Arc::ptr_eq(element, &self.head)
            || Arc::ptr_eq(element, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_skeleton() {
        let doc = Document::new();
        assert_eq!(doc.document_element().children().len(), 2);
        assert!(Arc::ptr_eq(&doc.body().parent().unwrap(), &doc.document_element()));
        assert!(doc.is_structural(&doc.head()));
        assert!(!doc.is_structural(&doc.create_element("div")));
    }

    #[test]
    fn append_child_reparents() {
        let a = Element::new("div");
        let b = Element::new("div");
        let child = Element::new("span");
        a.append_child(&child);
        b.append_child(&child);
        assert!(a.children().is_empty());
        assert_eq!(b.children().len(), 1);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &b));
    }

    #[test]
    fn append_child_refuses_cycles() {
        let root = Element::new("div");
        let middle = Element::new("section");
        let leaf = Element::new("span");
        root.append_child(&middle);
        middle.append_child(&leaf);

        assert!(!leaf.append_child(&root));
        assert!(!leaf.append_child(&leaf));
        assert!(root.parent().is_none());
        assert!(leaf.children().is_empty());
        assert_eq!(leaf.ancestors_inclusive().count(), 3);

        leaf.set_attribute("id", "leaf");
        assert!(Arc::ptr_eq(&root.find_by_dom_id("leaf").unwrap(), &leaf));
    }

    #[test]
    fn get_element_by_id_searches_whole_tree() {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("p");
        inner.set_attribute("id", "target");
        outer.append_child(&inner);
        doc.body().append_child(&outer);
        let found = doc.get_element_by_id("target").unwrap();
        assert!(Arc::ptr_eq(&found, &inner));
        assert!(doc.get_element_by_id("missing").is_none());
    }

    #[test]
    fn closest_with_attribute_includes_self() {
        let frag = Element::new("div");
        frag.set_attribute(SANDBOX_ATTRIBUTE, "acme");
        let leaf = Element::new("span");
        frag.append_child(&leaf);
        assert!(leaf.closest_with_attribute(SANDBOX_ATTRIBUTE, "acme").is_some());
        assert!(frag.closest_with_attribute(SANDBOX_ATTRIBUTE, "acme").is_some());
        assert!(leaf.closest_with_attribute(SANDBOX_ATTRIBUTE, "other").is_none());
    }

    #[test]
    fn style_is_shared_between_handles() {
        let el = Element::new("DIV");
        assert_eq!(el.tag_name(), "div");
        el.style().set_property("color", "red");
        assert_eq!(el.style().get_property("color").as_deref(), Some("red"));
        assert_eq!(el.style().css_text(), "color: red;");
    }
}
