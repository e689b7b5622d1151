//! The browser DOM as seen by the tracker.
//!
//! The engine never owns the page. It samples it through [`Document`] and [`DomNode`], which a
//! wasm binding implements over the real DOM and [`fixture::FixturePage`] implements in memory.
//! Node handles are cheap clones of a reference, like DOM element handles.

use std::cmp::Ordering;

use crate::error::Result;
use crate::identity::MessageId;

pub mod fixture;
mod selector;

pub use selector::{ElementView, Selector};

pub trait DomNode: Clone {
    /// Lowercase tag name.
    fn tag_name(&self) -> String;
    fn attribute(&self, name: &str) -> Option<String>;
    /// Concatenated text of the node and its descendants.
    fn text_content(&self) -> String;
    /// Serialized markup of the node's children (`innerHTML`).
    fn markup(&self) -> String;
    /// First descendant matching `selector`, excluding the node itself.
    fn select_first(&self, selector: &Selector) -> Option<Self>;
    fn parent(&self) -> Option<Self>;
    fn is_connected(&self) -> bool;
    /// Position of `self` relative to `other` in document order.
    fn document_order(&self, other: &Self) -> Ordering;
    /// Top edge of the bounding box relative to the viewport top, in CSS pixels.
    fn top_offset(&self) -> f64;
    /// Whether the node clips and scrolls its own overflowing content.
    fn is_scrollable(&self) -> bool;
    /// Identity written on the node by the last scan that saw it.
    fn tracked_id(&self) -> Option<MessageId>;
    fn set_tracked_id(&self, id: &MessageId);
    fn scroll_into_view(&self);
    /// Brief visual pulse drawing the reader's eye to the node.
    fn pulse_highlight(&self);
}

pub trait Document {
    type Node: DomNode;

    fn href(&self) -> String;
    fn title(&self) -> String;
    /// Every node matching `selector`, in whatever order the page returns them.
    fn select_all(&self, selector: &Selector) -> Vec<Self::Node>;
    fn select_first(&self, selector: &Selector) -> Option<Self::Node>;
    /// Connected node carrying `id` as its tracked identity.
    fn find_tracked(&self, id: &MessageId) -> Option<Self::Node>;
    fn viewport_height(&self) -> f64;
    fn scroll_metrics(&self, target: &ScrollTarget<Self::Node>) -> ScrollMetrics;
    fn scroll_to(&self, target: &ScrollTarget<Self::Node>, top: f64);
    /// Write into the page-scoped transient slot (session storage).
    fn store_session_value(&self, key: &str, value: &str) -> Result<()>;

    fn hostname(&self) -> Option<String> {
        url::Url::parse(&self.href())
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    }
}

/// What the bulk loader scrolls: the window itself or a scrollable element.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollTarget<N> {
    Window,
    Element(N),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn max_scroll(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Sort handles into true document order; query order is not trusted.
pub fn sort_document_order<N: DomNode>(nodes: &mut [N]) {
    nodes.sort_by(|a, b| a.document_order(b));
}
