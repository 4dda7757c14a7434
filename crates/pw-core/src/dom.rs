//! DOM access
//!
//! The scanner and the watcher only see the page through the [`Dom`] trait.
//! The browser binding implements it over `web_sys::Document`; [`MemoryDom`]
//! is a flat in-memory page used by tests and by the CLI's fixture scans.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::rules::StructuralSelector;
use crate::types::BoxSize;

// =============================================================================
// Trait
// =============================================================================

/// The element sets the scanner asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    Scripts,
    Iframes,
    Images,
    Structural(&'static [StructuralSelector]),
}

impl Query {
    /// CSS selector list for hosts with a native selector engine.
    pub fn to_css(&self) -> String {
        match self {
            Self::Scripts => "script".to_string(),
            Self::Iframes => "iframe".to_string(),
            Self::Images => "img".to_string(),
            Self::Structural(selectors) => selectors
                .iter()
                .map(StructuralSelector::to_css)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// How a matched element is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideStyle {
    /// `display: none`, `visibility: hidden` and `opacity: 0`
    Collapse,
    /// `display: none` only
    DisplayNone,
}

/// Transient DOM failures. Never fatal: callers log and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Node is detached from the document")]
    Detached,
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    #[error("DOM operation failed: {0}")]
    Operation(String),
}

/// Read and mutate access to one page's elements.
pub trait Dom {
    /// Handle to an element. Cheap to clone.
    type Node: Clone;

    /// Elements currently attached to the document that match `query`,
    /// in document order.
    fn query(&self, query: Query) -> Result<Vec<Self::Node>, DomError>;

    /// Lowercase tag name.
    fn tag_name(&self, node: &Self::Node) -> String;

    /// Attribute value, `None` when absent.
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Source URL of a script/iframe/img, `None` when absent or empty.
    fn source(&self, node: &Self::Node) -> Option<String> {
        self.attribute(node, "src").filter(|src| !src.is_empty())
    }

    fn text_content(&self, node: &Self::Node) -> String;

    fn class_list(&self, node: &Self::Node) -> Vec<String>;

    /// Rendered box of the element. Hidden elements report zero.
    fn box_size(&self, node: &Self::Node) -> BoxSize;

    /// Whether an earlier pass already hid this element.
    fn is_hidden(&self, node: &Self::Node) -> bool;

    /// Whether the element is still part of the document.
    fn is_attached(&self, node: &Self::Node) -> bool;

    fn remove(&mut self, node: &Self::Node) -> Result<(), DomError>;

    fn hide(&mut self, node: &Self::Node, style: HideStyle) -> Result<(), DomError>;
}

// =============================================================================
// Memory DOM
// =============================================================================

/// Element in a [`MemoryDom`], as written in a page fixture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryElement {
    pub tag: String,
    pub id: String,
    pub class: String,
    pub src: Option<String>,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub width: f64,
    pub height: f64,
}

impl MemoryElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn script(src: &str) -> Self {
        Self::new("script").with_src(src)
    }

    pub fn inline_script(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::new("script")
        }
    }

    pub fn with_src(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = class.to_string();
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn classes(&self) -> impl Iterator<Item = &str> {
        self.class.split_whitespace()
    }

    fn matches(&self, selector: &StructuralSelector) -> bool {
        match *selector {
            StructuralSelector::ClassContains(v) => self.class.contains(v),
            StructuralSelector::IdContains(v) => self.id.contains(v),
            StructuralSelector::HasClass(v) => self.classes().any(|c| c == v),
            StructuralSelector::HasAttribute(v) => self.attribute(v).is_some(),
            StructuralSelector::TagWithClass(tag, class) => {
                self.tag == tag && self.classes().any(|c| c == class)
            }
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" if !self.id.is_empty() => Some(self.id.clone()),
            "class" if !self.class.is_empty() => Some(self.class.clone()),
            "src" => self.src.clone(),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeState {
    removed: bool,
    hidden: Option<HideStyle>,
}

/// Handle into a [`MemoryDom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Page fixture: `{"elements": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageFixture {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub elements: Vec<MemoryElement>,
}

/// Flat in-memory document with optional injected faults.
#[derive(Debug, Clone, Default)]
pub struct MemoryDom {
    elements: Vec<MemoryElement>,
    state: Vec<NodeState>,
    failing_queries: HashSet<&'static str>,
    failing_nodes: HashSet<NodeId>,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: PageFixture) -> Self {
        let mut dom = Self::new();
        for element in fixture.elements {
            dom.append(element);
        }
        dom
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_fixture(serde_json::from_str(json)?))
    }

    /// Attach a new element at the end of the document.
    pub fn append(&mut self, mut element: MemoryElement) -> NodeId {
        element.tag = element.tag.to_ascii_lowercase();
        self.elements.push(element);
        self.state.push(NodeState::default());
        NodeId(self.elements.len() - 1)
    }

    pub fn element(&self, node: NodeId) -> Option<&MemoryElement> {
        self.elements.get(node.0)
    }

    pub fn is_removed(&self, node: NodeId) -> bool {
        self.state.get(node.0).is_some_and(|s| s.removed)
    }

    pub fn hidden_style(&self, node: NodeId) -> Option<HideStyle> {
        self.state.get(node.0).and_then(|s| s.hidden)
    }

    /// Number of elements still attached.
    pub fn attached_count(&self) -> usize {
        self.state.iter().filter(|s| !s.removed).count()
    }

    /// Make every future `query` of this kind fail with a selector error.
    pub fn fail_query(&mut self, query: Query) {
        self.failing_queries.insert(query_key(query));
    }

    /// Make every future mutation of `node` fail.
    pub fn fail_node(&mut self, node: NodeId) {
        self.failing_nodes.insert(node);
    }

    fn attached(&self) -> impl Iterator<Item = (NodeId, &MemoryElement)> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.state[*i].removed)
            .map(|(i, e)| (NodeId(i), e))
    }

    fn state_mut(&mut self, node: NodeId) -> Result<&mut NodeState, DomError> {
        if self.failing_nodes.contains(&node) {
            return Err(DomError::Operation(format!("injected failure on node {}", node.0)));
        }
        match self.state.get_mut(node.0) {
            Some(state) if !state.removed => Ok(state),
            _ => Err(DomError::Detached),
        }
    }
}

fn query_key(query: Query) -> &'static str {
    match query {
        Query::Scripts => "scripts",
        Query::Iframes => "iframes",
        Query::Images => "images",
        Query::Structural(_) => "structural",
    }
}

impl Dom for MemoryDom {
    type Node = NodeId;

    fn query(&self, query: Query) -> Result<Vec<NodeId>, DomError> {
        if self.failing_queries.contains(query_key(query)) {
            return Err(DomError::InvalidSelector(query.to_css()));
        }
        let nodes = match query {
            Query::Scripts => self.attached().filter(|(_, e)| e.tag == "script").map(|(n, _)| n).collect(),
            Query::Iframes => self.attached().filter(|(_, e)| e.tag == "iframe").map(|(n, _)| n).collect(),
            Query::Images => self.attached().filter(|(_, e)| e.tag == "img").map(|(n, _)| n).collect(),
            Query::Structural(selectors) => self
                .attached()
                .filter(|(_, e)| selectors.iter().any(|s| e.matches(s)))
                .map(|(n, _)| n)
                .collect(),
        };
        Ok(nodes)
    }

    fn tag_name(&self, node: &NodeId) -> String {
        self.element(*node).map(|e| e.tag.clone()).unwrap_or_default()
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.element(*node).and_then(|e| e.attribute(name))
    }

    fn text_content(&self, node: &NodeId) -> String {
        self.element(*node).map(|e| e.text.clone()).unwrap_or_default()
    }

    fn class_list(&self, node: &NodeId) -> Vec<String> {
        self.element(*node)
            .map(|e| e.classes().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn box_size(&self, node: &NodeId) -> BoxSize {
        match (self.element(*node), self.state.get(node.0)) {
            (Some(e), Some(state)) if !state.removed && state.hidden.is_none() => {
                BoxSize::new(e.width, e.height)
            }
            _ => BoxSize::default(),
        }
    }

    fn is_hidden(&self, node: &NodeId) -> bool {
        self.hidden_style(*node).is_some()
    }

    fn is_attached(&self, node: &NodeId) -> bool {
        node.0 < self.state.len() && !self.is_removed(*node)
    }

    fn remove(&mut self, node: &NodeId) -> Result<(), DomError> {
        self.state_mut(*node)?.removed = true;
        Ok(())
    }

    fn hide(&mut self, node: &NodeId, style: HideStyle) -> Result<(), DomError> {
        self.state_mut(*node)?.hidden = Some(style);
        Ok(())
    }
}
