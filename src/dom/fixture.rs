//! In-memory page used by the test suite and the `turntrack` harness.
//!
//! A fixture is a `html > body > main` skeleton holding message elements. Each message has a
//! vertical offset inside the scrollable content, may stay unmounted until the page has been
//! scrolled far enough (virtualized lists), and may sit at a document position different from
//! its query position. Pages deserialize from JSON so recorded layouts can be replayed.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::{Document, DomNode, ElementView, ScrollMetrics, ScrollTarget, Selector};
use crate::error::{Result, TrackerError};
use crate::identity::MessageId;

const RANK_STRIDE: u64 = 1_000;
const DEFAULT_VIEWPORT_HEIGHT: f64 = 800.0;
const MESSAGE_HEIGHT: f64 = 200.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSpec {
    pub element: ElementSpec,
    /// Offset of the top edge from the top of the scrollable content.
    pub top: f64,
    /// Stays out of the DOM until the scroll offset reaches this value.
    #[serde(default)]
    pub mount_at: Option<f64>,
    /// Document position; defaults to insertion order.
    #[serde(default)]
    pub position: Option<u64>,
}

impl MessageSpec {
    pub fn new(element: ElementSpec, top: f64) -> Self {
        Self {
            element,
            top,
            mount_at: None,
            position: None,
        }
    }

    pub fn mounted_at(mut self, scroll_top: f64) -> Self {
        self.mount_at = Some(scroll_top);
        self
    }

    pub fn at_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// ChatGPT turn: role carried by `data-message-author-role`, text in `.markdown`.
    pub fn chatgpt(role: &str, text: &str, top: f64) -> Self {
        let element = ElementSpec::new("div")
            .attr("data-message-author-role", role)
            .child(ElementSpec::new("div").attr("class", "markdown prose").text(text));
        Self::new(element, top)
    }

    pub fn claude_user(text: &str, top: f64) -> Self {
        let element = ElementSpec::new("div")
            .attr("data-test-render-count", "1")
            .child(
                ElementSpec::new("div")
                    .attr("data-testid", "user-message")
                    .text(text),
            );
        Self::new(element, top)
    }

    pub fn claude_assistant(text: &str, top: f64) -> Self {
        let element = ElementSpec::new("div")
            .attr("data-test-render-count", "1")
            .child(
                ElementSpec::new("div")
                    .attr("class", "font-claude-response")
                    .text(text),
            );
        Self::new(element, top)
    }

    pub fn gemini_user(text: &str, top: f64) -> Self {
        let element = ElementSpec::new("user-query")
            .child(ElementSpec::new("div").attr("class", "query-text").text(text));
        Self::new(element, top)
    }

    pub fn gemini_model(text: &str, top: f64) -> Self {
        let element = ElementSpec::new("model-response")
            .child(ElementSpec::new("div").attr("class", "markdown").text(text));
        Self::new(element, top)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,
    /// Total scrollable height; derived from the message offsets when absent.
    #[serde(default)]
    pub content_height: Option<f64>,
    /// Whether `main` is the scrolling element (otherwise the window scrolls).
    #[serde(default)]
    pub main_scrolls: bool,
    /// Class attribute given to `main`.
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageSpec>,
}

fn default_viewport_height() -> f64 {
    DEFAULT_VIEWPORT_HEIGHT
}

impl PageSpec {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            content_height: None,
            main_scrolls: false,
            main_class: None,
            messages: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn message(mut self, message: MessageSpec) -> Self {
        self.messages.push(message);
        self
    }
}

#[derive(Debug)]
struct NodeData {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<usize>,
    children: Vec<usize>,
    rank: u64,
    top: f64,
    mount_at: Option<f64>,
    mounted: bool,
    removed: bool,
    scrollable: bool,
    tracked: Option<MessageId>,
    highlights: u32,
    scrolled_into_view: u32,
}

impl NodeData {
    fn structural(tag: &str, rank: u64, parent: Option<usize>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            text: String::new(),
            parent,
            children: Vec::new(),
            rank,
            top: 0.0,
            mount_at: None,
            mounted: true,
            removed: false,
            scrollable: false,
            tracked: None,
            highlights: 0,
            scrolled_into_view: 0,
        }
    }
}

impl ElementView for NodeData {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
struct PageState {
    href: String,
    title: String,
    viewport_height: f64,
    content_height: Option<f64>,
    scroll_top: f64,
    nodes: Vec<NodeData>,
    main: usize,
    messages: Vec<usize>,
    session: BTreeMap<String, String>,
    session_writable: bool,
    scroll_log: Vec<f64>,
}

impl PageState {
    fn connected(&self, mut idx: usize) -> bool {
        loop {
            let node = &self.nodes[idx];
            if node.removed || !node.mounted {
                return false;
            }
            match node.parent {
                Some(p) => idx = p,
                None => return true,
            }
        }
    }

    fn insert_subtree(&mut self, spec: &ElementSpec, parent: usize, rank: &mut u64, top: f64) -> usize {
        let idx = self.nodes.len();
        let mut node = NodeData::structural(&spec.tag.to_ascii_lowercase(), *rank, Some(parent));
        node.attrs = spec.attrs.clone();
        node.text = spec.text.clone();
        node.top = top;
        self.nodes.push(node);
        self.nodes[parent].children.push(idx);
        for child in &spec.children {
            *rank += 1;
            self.insert_subtree(child, idx, rank, top);
        }
        idx
    }

    fn insert_message(&mut self, spec: &MessageSpec) -> usize {
        let position = spec.position.unwrap_or(self.messages.len() as u64);
        let mut rank = (position + 1) * RANK_STRIDE;
        let main = self.main;
        let idx = self.insert_subtree(&spec.element, main, &mut rank, spec.top);
        let scroll_top = self.scroll_top;
        let node = &mut self.nodes[idx];
        node.mount_at = spec.mount_at;
        node.mounted = spec.mount_at.is_none_or(|at| scroll_top >= at);
        self.messages.push(idx);
        idx
    }

    fn text_content(&self, idx: usize) -> String {
        let node = &self.nodes[idx];
        let mut out = node.text.clone();
        for &child in &node.children {
            out.push_str(&self.text_content(child));
        }
        out
    }

    fn inner_markup(&self, idx: usize) -> String {
        let node = &self.nodes[idx];
        let mut out = node.text.clone();
        for &child in &node.children {
            let c = &self.nodes[child];
            out.push('<');
            out.push_str(&c.tag);
            for (k, v) in &c.attrs {
                out.push_str(&format!(" {k}=\"{v}\""));
            }
            out.push('>');
            out.push_str(&self.inner_markup(child));
            out.push_str(&format!("</{}>", c.tag));
        }
        out
    }

    fn first_descendant(&self, idx: usize, selector: &Selector) -> Option<usize> {
        for &child in &self.nodes[idx].children {
            if self.nodes[child].removed || !self.nodes[child].mounted {
                continue;
            }
            if selector.matches(&self.nodes[child]) {
                return Some(child);
            }
            if let Some(found) = self.first_descendant(child, selector) {
                return Some(found);
            }
        }
        None
    }

    fn content_height(&self) -> f64 {
        self.content_height.unwrap_or_else(|| {
            self.messages
                .iter()
                .map(|&m| self.nodes[m].top + MESSAGE_HEIGHT)
                .fold(self.viewport_height, f64::max)
        })
    }

    fn scroll_to(&mut self, top: f64) {
        let max = (self.content_height() - self.viewport_height).max(0.0);
        self.scroll_top = top.clamp(0.0, max);
        self.scroll_log.push(self.scroll_top);
        let reached = self.scroll_top;
        for &m in &self.messages {
            let node = &mut self.nodes[m];
            if !node.mounted && node.mount_at.is_some_and(|at| reached >= at) {
                node.mounted = true;
            }
        }
    }
}

/// Shared handle to an in-memory page. Clones observe and mutate the same page.
#[derive(Debug, Clone)]
pub struct FixturePage {
    state: Rc<RefCell<PageState>>,
}

impl FixturePage {
    pub fn new(spec: PageSpec) -> Self {
        let mut nodes = vec![
            NodeData::structural("html", 0, None),
            NodeData::structural("body", 1, Some(0)),
            NodeData::structural("main", 2, Some(1)),
        ];
        nodes[0].children.push(1);
        nodes[1].children.push(2);
        nodes[2].scrollable = spec.main_scrolls;
        if let Some(class) = &spec.main_class {
            nodes[2].attrs.insert("class".to_string(), class.clone());
        }

        let mut state = PageState {
            href: spec.url,
            title: spec.title,
            viewport_height: spec.viewport_height,
            content_height: spec.content_height,
            scroll_top: 0.0,
            nodes,
            main: 2,
            messages: Vec::new(),
            session: BTreeMap::new(),
            session_writable: true,
            scroll_log: Vec::new(),
        };
        for message in &spec.messages {
            state.insert_message(message);
        }
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let spec: PageSpec = serde_json::from_str(raw)?;
        Ok(Self::new(spec))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Append a message; returns its index for later mutation.
    pub fn push_message(&self, message: MessageSpec) -> usize {
        let mut state = self.state.borrow_mut();
        state.insert_message(&message);
        state.messages.len() - 1
    }

    /// Detach a message from the DOM (branch switch, edit, virtualization eviction).
    pub fn remove_message(&self, index: usize) {
        let mut state = self.state.borrow_mut();
        let idx = state.messages[index];
        state.nodes[idx].removed = true;
    }

    pub fn restore_message(&self, index: usize) {
        let mut state = self.state.borrow_mut();
        let idx = state.messages[index];
        state.nodes[idx].removed = false;
    }

    /// Move a message to a new document position without changing its query position.
    pub fn reposition_message(&self, index: usize, position: u64) {
        let mut state = self.state.borrow_mut();
        let idx = state.messages[index];
        let base = (position + 1) * RANK_STRIDE;
        let delta = base as i64 - state.nodes[idx].rank as i64;
        let mut stack = vec![idx];
        while let Some(n) = stack.pop() {
            let node = &mut state.nodes[n];
            node.rank = (node.rank as i64 + delta) as u64;
            stack.extend(node.children.iter().copied());
        }
    }

    pub fn set_url(&self, url: &str) {
        self.state.borrow_mut().href = url.to_string();
    }

    pub fn set_title(&self, title: &str) {
        self.state.borrow_mut().title = title.to_string();
    }

    pub fn set_session_writable(&self, writable: bool) {
        self.state.borrow_mut().session_writable = writable;
    }

    pub fn message(&self, index: usize) -> FixtureNode {
        let idx = self.state.borrow().messages[index];
        FixtureNode {
            page: Rc::clone(&self.state),
            idx,
        }
    }

    pub fn message_count(&self) -> usize {
        self.state.borrow().messages.len()
    }

    pub fn scroll_top(&self) -> f64 {
        self.state.borrow().scroll_top
    }

    /// Every offset the page was scrolled to, in order.
    pub fn scroll_log(&self) -> Vec<f64> {
        self.state.borrow().scroll_log.clone()
    }

    pub fn session_value(&self, key: &str) -> Option<String> {
        self.state.borrow().session.get(key).cloned()
    }

    pub fn highlight_count(&self, index: usize) -> u32 {
        let state = self.state.borrow();
        state.nodes[state.messages[index]].highlights
    }

    pub fn scrolled_into_view_count(&self, index: usize) -> u32 {
        let state = self.state.borrow();
        state.nodes[state.messages[index]].scrolled_into_view
    }

    fn node(&self, idx: usize) -> FixtureNode {
        FixtureNode {
            page: Rc::clone(&self.state),
            idx,
        }
    }
}

impl Document for FixturePage {
    type Node = FixtureNode;

    fn href(&self) -> String {
        self.state.borrow().href.clone()
    }

    fn title(&self) -> String {
        self.state.borrow().title.clone()
    }

    fn select_all(&self, selector: &Selector) -> Vec<FixtureNode> {
        let matches: Vec<usize> = {
            let state = self.state.borrow();
            (0..state.nodes.len())
                .filter(|&i| state.connected(i) && selector.matches(&state.nodes[i]))
                .collect()
        };
        matches.into_iter().map(|i| self.node(i)).collect()
    }

    fn select_first(&self, selector: &Selector) -> Option<FixtureNode> {
        self.select_all(selector).into_iter().next()
    }

    fn find_tracked(&self, id: &MessageId) -> Option<FixtureNode> {
        let found = {
            let state = self.state.borrow();
            (0..state.nodes.len())
                .find(|&i| state.connected(i) && state.nodes[i].tracked.as_ref() == Some(id))
        };
        found.map(|i| self.node(i))
    }

    fn viewport_height(&self) -> f64 {
        self.state.borrow().viewport_height
    }

    fn scroll_metrics(&self, _target: &ScrollTarget<FixtureNode>) -> ScrollMetrics {
        let state = self.state.borrow();
        ScrollMetrics {
            top: state.scroll_top,
            scroll_height: state.content_height(),
            client_height: state.viewport_height,
        }
    }

    fn scroll_to(&self, _target: &ScrollTarget<FixtureNode>, top: f64) {
        self.state.borrow_mut().scroll_to(top);
    }

    fn store_session_value(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.session_writable {
            return Err(TrackerError::store("session storage is not writable"));
        }
        state.session.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Handle to one element of a [`FixturePage`].
#[derive(Debug, Clone)]
pub struct FixtureNode {
    page: Rc<RefCell<PageState>>,
    idx: usize,
}

impl PartialEq for FixtureNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.page, &other.page) && self.idx == other.idx
    }
}

impl DomNode for FixtureNode {
    fn tag_name(&self) -> String {
        self.page.borrow().nodes[self.idx].tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.page.borrow().nodes[self.idx].attrs.get(name).cloned()
    }

    fn text_content(&self) -> String {
        self.page.borrow().text_content(self.idx)
    }

    fn markup(&self) -> String {
        self.page.borrow().inner_markup(self.idx)
    }

    fn select_first(&self, selector: &Selector) -> Option<Self> {
        let found = self.page.borrow().first_descendant(self.idx, selector);
        found.map(|idx| Self {
            page: Rc::clone(&self.page),
            idx,
        })
    }

    fn parent(&self) -> Option<Self> {
        let parent = self.page.borrow().nodes[self.idx].parent;
        parent.map(|idx| Self {
            page: Rc::clone(&self.page),
            idx,
        })
    }

    fn is_connected(&self) -> bool {
        self.page.borrow().connected(self.idx)
    }

    fn document_order(&self, other: &Self) -> Ordering {
        let state = self.page.borrow();
        state.nodes[self.idx]
            .rank
            .cmp(&state.nodes[other.idx].rank)
            .then(self.idx.cmp(&other.idx))
    }

    fn top_offset(&self) -> f64 {
        let state = self.page.borrow();
        state.nodes[self.idx].top - state.scroll_top
    }

    fn is_scrollable(&self) -> bool {
        let state = self.page.borrow();
        state.nodes[self.idx].scrollable && state.content_height() > state.viewport_height
    }

    fn tracked_id(&self) -> Option<MessageId> {
        self.page.borrow().nodes[self.idx].tracked.clone()
    }

    fn set_tracked_id(&self, id: &MessageId) {
        self.page.borrow_mut().nodes[self.idx].tracked = Some(id.clone());
    }

    fn scroll_into_view(&self) {
        let mut state = self.page.borrow_mut();
        let target = state.nodes[self.idx].top - state.viewport_height / 2.0;
        state.nodes[self.idx].scrolled_into_view += 1;
        state.scroll_to(target);
    }

    fn pulse_highlight(&self) {
        self.page.borrow_mut().nodes[self.idx].highlights += 1;
    }
}
