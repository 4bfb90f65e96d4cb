//! Arena DOM for UI-hierarchy dumps.
//!
//! Documents are parsed strictly with `quick-xml`; tolerance for damaged
//! captures lives in [`repair`], which runs before parsing and never inside it.

pub mod repair;
pub mod xpath;

use quick_xml::errors::{Error, IllFormedError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::domain::{Rect, XmlError};

pub type NodeId = usize;

/// One element in the arena. Text and comments are not materialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub depth: usize,
    /// Element directly contains non-whitespace character data.
    pub has_text: bool,
}

/// Parsed hierarchy. Node ids are assigned in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    nodes: Vec<XmlElement>,
}

fn malformed(position: u64, message: impl ToString) -> XmlError {
    XmlError::Malformed {
        position,
        message: message.to_string(),
    }
}

impl XmlDocument {
    /// Parse `content` into an arena. Fails on any well-formedness error.
    pub fn parse(content: &str) -> Result<Self, XmlError> {
        if content.trim().is_empty() {
            return Err(XmlError::Empty);
        }

        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut doc = XmlDocument { nodes: Vec::new() };
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            let position = reader.buffer_position() as u64;
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = doc.push(&e, &stack, position)?;
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    doc.push(&e, &stack, position)?;
                }
                Ok(Event::End(_)) => {
                    if stack.pop().is_none() {
                        return Err(malformed(position, "end tag without matching start"));
                    }
                }
                Ok(Event::Text(_)) | Ok(Event::CData(_)) => {
                    if let Some(&top) = stack.last() {
                        doc.nodes[top].has_text = true;
                    }
                }
                Ok(Event::Eof) | Err(Error::IllFormed(IllFormedError::MissingEndTag(_))) => break,
                Ok(_) => {}
                Err(e) => return Err(malformed(position, e)),
            }
        }

        if let Some(&open) = stack.last() {
            return Err(XmlError::Unclosed(doc.nodes[open].name.clone()));
        }
        if doc.nodes.is_empty() {
            return Err(XmlError::NoRoot);
        }
        Ok(doc)
    }

    fn push(
        &mut self,
        start: &BytesStart<'_>,
        stack: &[NodeId],
        position: u64,
    ) -> Result<NodeId, XmlError> {
        let parent = stack.last().copied();
        if parent.is_none() && !self.nodes.is_empty() {
            return Err(malformed(position, "multiple root elements"));
        }

        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(position, e))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| malformed(position, e))?
                .into_owned();
            attributes.push((key, value));
        }

        let id = self.nodes.len();
        self.nodes.push(XmlElement {
            name,
            attributes,
            parent,
            children: Vec::new(),
            depth: stack.len(),
            has_text: false,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        Ok(id)
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.element(0)
    }

    /// Panics if `id` did not come from this document.
    pub fn element(&self, id: NodeId) -> ElementRef<'_> {
        debug_assert!(id < self.nodes.len());
        ElementRef { doc: self, id }
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        (0..self.nodes.len()).map(move |id| ElementRef { doc: self, id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Any element named `hierarchy` or `node`.
    pub fn has_hierarchy_markers(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.name == "hierarchy" || n.name == "node")
    }

    pub(crate) fn raw(&self, id: NodeId) -> &XmlElement {
        &self.nodes[id]
    }
}

/// Borrowed handle to one element of a document.
#[derive(Debug, Clone, Copy)]
pub struct ElementRef<'d> {
    doc: &'d XmlDocument,
    id: NodeId,
}

impl PartialEq for ElementRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }
}

impl<'d> ElementRef<'d> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'d str {
        &self.doc.nodes[self.id].name
    }

    pub fn attr(&self, key: &str) -> Option<&'d str> {
        self.doc.nodes[self.id]
            .attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &'d [(String, String)] {
        &self.doc.nodes[self.id].attributes
    }

    pub fn parent(&self) -> Option<ElementRef<'d>> {
        self.doc.nodes[self.id].parent.map(|p| self.doc.element(p))
    }

    pub fn children(&self) -> impl Iterator<Item = ElementRef<'d>> + 'd {
        let doc = self.doc;
        doc.nodes[self.id].children.iter().map(move |&c| doc.element(c))
    }

    pub fn depth(&self) -> usize {
        self.doc.nodes[self.id].depth
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.attr("bounds").and_then(|b| b.parse().ok())
    }

    /// 1-based position among siblings with the same name.
    pub fn sibling_position(&self) -> usize {
        match self.parent() {
            None => 1,
            Some(parent) => {
                parent
                    .children()
                    .filter(|c| c.name() == self.name())
                    .position(|c| c.id == self.id)
                    .unwrap_or(0)
                    + 1
            }
        }
    }

    /// Absolute indexed path, e.g. `/hierarchy/node[1]/node[3]`.
    pub fn xpath(&self) -> String {
        let mut segments = Vec::new();
        let mut current = Some(*self);
        while let Some(el) = current {
            if el.parent().is_some() {
                segments.push(format!("{}[{}]", el.name(), el.sibling_position()));
            } else {
                segments.push(el.name().to_string());
            }
            current = el.parent();
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    pub fn summary(&self) -> UiElement {
        let non_empty = |k: &str| self.attr(k).filter(|v| !v.is_empty()).map(str::to_string);
        UiElement {
            path: self.xpath(),
            class_name: non_empty("class"),
            resource_id: non_empty("resource-id"),
            text: non_empty("text"),
            content_desc: non_empty("content-desc"),
            bounds: self.bounds(),
            clickable: self.attr("clickable") == Some("true"),
        }
    }
}

/// Flattened description of one element, cached next to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    pub clickable: bool,
}

/// Parse and flatten every `node` element. Returns an empty list on parse failure.
pub fn extract_elements(content: &str) -> Vec<UiElement> {
    match XmlDocument::parse(content) {
        Ok(doc) => doc
            .elements()
            .filter(|e| e.name() == "node")
            .map(|e| e.summary())
            .collect(),
        Err(err) => {
            tracing::debug!(event = "xml.extract_failed", error = %err);
            Vec::new()
        }
    }
}
