//! [`Dom`] over the live document.

use pw_core::dom::{Dom, DomError, HideStyle, Query};
use pw_core::types::BoxSize;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element, HtmlElement, HtmlIFrameElement, HtmlImageElement, HtmlScriptElement};

/// Attribute set on every element we hide, so later passes skip it even if
/// the page rewrites its inline style.
const HIDDEN_MARKER: &str = "data-pagewarden-hidden";

pub struct WebDom {
    document: Document,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

pub(crate) fn describe(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

fn set_style(element: &HtmlElement, property: &str, value: &str) -> Result<(), DomError> {
    element
        .style()
        .set_property_with_priority(property, value, "important")
        .map_err(|e| DomError::Operation(describe(&e)))
}

impl Dom for WebDom {
    type Node = Element;

    fn query(&self, query: Query) -> Result<Vec<Element>, DomError> {
        let selector = query.to_css();
        let list = self
            .document
            .query_selector_all(&selector)
            .map_err(|_| DomError::InvalidSelector(selector))?;

        Ok((0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect())
    }

    fn tag_name(&self, node: &Element) -> String {
        node.tag_name().to_ascii_lowercase()
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    // Resolved URLs, as the page would request them
    fn source(&self, node: &Element) -> Option<String> {
        let src = if let Some(script) = node.dyn_ref::<HtmlScriptElement>() {
            script.src()
        } else if let Some(iframe) = node.dyn_ref::<HtmlIFrameElement>() {
            iframe.src()
        } else if let Some(image) = node.dyn_ref::<HtmlImageElement>() {
            image.src()
        } else {
            node.get_attribute("src")?
        };
        Some(src).filter(|s| !s.is_empty())
    }

    fn text_content(&self, node: &Element) -> String {
        node.text_content().unwrap_or_default()
    }

    fn class_list(&self, node: &Element) -> Vec<String> {
        let list = node.class_list();
        (0..list.length()).filter_map(|i| list.item(i)).collect()
    }

    fn box_size(&self, node: &Element) -> BoxSize {
        if self.is_hidden(node) {
            return BoxSize::default();
        }
        // Image dimensions fall back to the width/height attributes when the
        // image is not rendered, so display:none pixels still report 1x1
        if let Some(image) = node.dyn_ref::<HtmlImageElement>() {
            return BoxSize::new(f64::from(image.width()), f64::from(image.height()));
        }
        match node.dyn_ref::<HtmlElement>() {
            Some(html) => BoxSize::new(f64::from(html.offset_width()), f64::from(html.offset_height())),
            None => {
                let rect = node.get_bounding_client_rect();
                BoxSize::new(rect.width(), rect.height())
            }
        }
    }

    fn is_hidden(&self, node: &Element) -> bool {
        node.has_attribute(HIDDEN_MARKER)
    }

    fn is_attached(&self, node: &Element) -> bool {
        node.is_connected()
    }

    fn remove(&mut self, node: &Element) -> Result<(), DomError> {
        if !node.is_connected() {
            return Err(DomError::Detached);
        }
        node.remove();
        Ok(())
    }

    fn hide(&mut self, node: &Element, style: HideStyle) -> Result<(), DomError> {
        if !node.is_connected() {
            return Err(DomError::Detached);
        }
        let html = node
            .dyn_ref::<HtmlElement>()
            .ok_or_else(|| DomError::Operation(format!("<{}> has no style", self.tag_name(node))))?;

        set_style(html, "display", "none")?;
        if style == HideStyle::Collapse {
            set_style(html, "visibility", "hidden")?;
            set_style(html, "opacity", "0")?;
        }
        node.set_attribute(HIDDEN_MARKER, "")
            .map_err(|e| DomError::Operation(describe(&e)))
    }
}
