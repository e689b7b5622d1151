//! Per-site message markup profiles.
//!
//! Each supported chat site gets a small profile: where message nodes live, how to tell user
//! turns from assistant turns, and where the message text sits. [`Platform`] selects exactly
//! one profile per page from the hostname; unsupported sites get none and the tracker stays
//! inert.

use crate::dom::{DomNode, Selector};

pub mod chatgpt;
pub mod claude;
pub mod gemini;

pub use chatgpt::ChatGptProfile;
pub use claude::ClaudeProfile;
pub use gemini::GeminiProfile;

pub trait PlatformProfile {
    /// Hostname fragments that select this profile.
    fn domains(&self) -> &'static [&'static str];

    fn message_selector(&self) -> &'static Selector;

    /// `dom_index` is the node's position among all message nodes in document order.
    fn is_user_message<N: DomNode>(&self, node: &N, dom_index: usize) -> bool;

    fn is_assistant_message<N: DomNode>(&self, node: &N) -> bool;

    /// Visible message text, trimmed.
    fn content<N: DomNode>(&self, node: &N) -> String;

    /// Whether an assistant turn follows `nodes[index]`; `nodes` are in document order.
    fn has_response_after<N: DomNode>(&self, nodes: &[N], index: usize) -> bool {
        nodes
            .iter()
            .skip(index + 1)
            .any(|n| self.is_assistant_message(n))
    }

    /// Element the bulk loader should scroll instead of probing for one.
    fn scroll_container(&self) -> Option<&'static Selector> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Claude,
    ChatGpt,
    Gemini,
}

impl Platform {
    /// Detection order; the first profile whose domain occurs in the hostname wins.
    pub const ALL: [Platform; 3] = [Platform::Claude, Platform::ChatGpt, Platform::Gemini];

    pub fn detect(hostname: &str) -> Option<Self> {
        let host = hostname.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.domains().iter().any(|d| host.contains(d)))
    }

    /// Primary domain, also used in fallback conversation titles.
    pub fn domain(self) -> &'static str {
        self.domains()[0]
    }

    pub fn domains(self) -> &'static [&'static str] {
        match self {
            Platform::Claude => ClaudeProfile.domains(),
            Platform::ChatGpt => ChatGptProfile.domains(),
            Platform::Gemini => GeminiProfile.domains(),
        }
    }

    pub fn message_selector(self) -> &'static Selector {
        match self {
            Platform::Claude => ClaudeProfile.message_selector(),
            Platform::ChatGpt => ChatGptProfile.message_selector(),
            Platform::Gemini => GeminiProfile.message_selector(),
        }
    }

    pub fn is_user_message<N: DomNode>(self, node: &N, dom_index: usize) -> bool {
        match self {
            Platform::Claude => ClaudeProfile.is_user_message(node, dom_index),
            Platform::ChatGpt => ChatGptProfile.is_user_message(node, dom_index),
            Platform::Gemini => GeminiProfile.is_user_message(node, dom_index),
        }
    }

    pub fn is_assistant_message<N: DomNode>(self, node: &N) -> bool {
        match self {
            Platform::Claude => ClaudeProfile.is_assistant_message(node),
            Platform::ChatGpt => ChatGptProfile.is_assistant_message(node),
            Platform::Gemini => GeminiProfile.is_assistant_message(node),
        }
    }

    pub fn content<N: DomNode>(self, node: &N) -> String {
        match self {
            Platform::Claude => ClaudeProfile.content(node),
            Platform::ChatGpt => ChatGptProfile.content(node),
            Platform::Gemini => GeminiProfile.content(node),
        }
    }

    pub fn has_response_after<N: DomNode>(self, nodes: &[N], index: usize) -> bool {
        match self {
            Platform::Claude => ClaudeProfile.has_response_after(nodes, index),
            Platform::ChatGpt => ChatGptProfile.has_response_after(nodes, index),
            Platform::Gemini => GeminiProfile.has_response_after(nodes, index),
        }
    }

    pub fn scroll_container(self) -> Option<&'static Selector> {
        match self {
            Platform::Claude => ClaudeProfile.scroll_container(),
            Platform::ChatGpt => ChatGptProfile.scroll_container(),
            Platform::Gemini => GeminiProfile.scroll_container(),
        }
    }
}

/// Text of the first descendant matching `selector`, else the node's own text; trimmed.
pub(crate) fn text_of_first_or_self<N: DomNode>(node: &N, selector: &Selector) -> String {
    node.select_first(selector)
        .map(|inner| inner.text_content())
        .unwrap_or_else(|| node.text_content())
        .trim()
        .to_string()
}
