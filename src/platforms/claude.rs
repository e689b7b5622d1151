//! claude.ai
//!
//! Every rendered turn is a `div[data-test-render-count]`. User turns usually wrap their text
//! in `[data-testid="user-message"]`; assistant turns carry the `font-claude-response` class
//! somewhere inside, or a `[data-is-streaming]` marker while tokens are still arriving. Older
//! markup has neither test id, so user turns fall back to the right-aligned bubble styling.

use std::sync::LazyLock;

use crate::dom::{DomNode, Selector};
use crate::platforms::{PlatformProfile, text_of_first_or_self};

const ASSISTANT_CLASS: &str = "font-claude-response";
const USER_BUBBLE_CLASS: &str = "bg-bg-300";
const USER_ALIGN_CLASS: &str = "items-end";

static MESSAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::attr("data-test-render-count").with_tag("div"));
static USER_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::attr_eq("data-testid", "user-message"));
static STREAMING: LazyLock<Selector> = LazyLock::new(|| Selector::attr("data-is-streaming"));

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeProfile;

impl ClaudeProfile {
    fn looks_like_assistant<N: DomNode>(node: &N) -> bool {
        node.markup().contains(ASSISTANT_CLASS) || node.select_first(&STREAMING).is_some()
    }
}

impl PlatformProfile for ClaudeProfile {
    fn domains(&self) -> &'static [&'static str] {
        &["claude.ai"]
    }

    fn message_selector(&self) -> &'static Selector {
        &MESSAGE
    }

    fn is_user_message<N: DomNode>(&self, node: &N, _dom_index: usize) -> bool {
        if node.select_first(&USER_TEXT).is_some() {
            return true;
        }
        if Self::looks_like_assistant(node) {
            return false;
        }
        let markup = node.markup();
        markup.contains(USER_BUBBLE_CLASS) && markup.contains(USER_ALIGN_CLASS)
    }

    fn is_assistant_message<N: DomNode>(&self, node: &N) -> bool {
        Self::looks_like_assistant(node)
    }

    fn content<N: DomNode>(&self, node: &N) -> String {
        text_of_first_or_self(node, &USER_TEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::dom::fixture::{ElementSpec, FixturePage, MessageSpec, PageSpec};

    fn page_with(messages: Vec<MessageSpec>) -> FixturePage {
        let mut spec = PageSpec::new("https://claude.ai/chat/1");
        spec.messages = messages;
        FixturePage::new(spec)
    }

    #[test]
    fn classifies_test_id_turns() {
        let page = page_with(vec![
            MessageSpec::claude_user("  What is a monad?  ", 0.0),
            MessageSpec::claude_assistant("A monoid in the category...", 200.0),
        ]);
        let nodes = page.select_all(ClaudeProfile.message_selector());
        assert_eq!(nodes.len(), 2);

        assert!(ClaudeProfile.is_user_message(&nodes[0], 0));
        assert!(!ClaudeProfile.is_assistant_message(&nodes[0]));
        assert_eq!(ClaudeProfile.content(&nodes[0]), "What is a monad?");

        assert!(!ClaudeProfile.is_user_message(&nodes[1], 1));
        assert!(ClaudeProfile.is_assistant_message(&nodes[1]));
        assert!(ClaudeProfile.has_response_after(&nodes, 0));
        assert!(!ClaudeProfile.has_response_after(&nodes, 1));
    }

    #[test]
    fn streaming_marker_counts_as_assistant() {
        let streaming = ElementSpec::new("div")
            .attr("data-test-render-count", "3")
            .child(ElementSpec::new("div").attr("data-is-streaming", "true").text("Partial an"));
        let page = page_with(vec![MessageSpec::new(streaming, 0.0)]);
        let node = &page.select_all(ClaudeProfile.message_selector())[0];
        assert!(ClaudeProfile.is_assistant_message(node));
        assert!(!ClaudeProfile.is_user_message(node, 0));
    }

    #[test]
    fn legacy_bubble_styling_marks_user_turn() {
        let legacy = ElementSpec::new("div")
            .attr("data-test-render-count", "1")
            .child(
                ElementSpec::new("div")
                    .attr("class", "flex items-end")
                    .child(ElementSpec::new("div").attr("class", "bg-bg-300 rounded").text("old style")),
            );
        let plain = ElementSpec::new("div")
            .attr("data-test-render-count", "1")
            .child(ElementSpec::new("div").attr("class", "items-end").text("no bubble"));
        let page = page_with(vec![MessageSpec::new(legacy, 0.0), MessageSpec::new(plain, 200.0)]);
        let nodes = page.select_all(ClaudeProfile.message_selector());

        assert!(ClaudeProfile.is_user_message(&nodes[0], 0));
        assert_eq!(ClaudeProfile.content(&nodes[0]), "old style");
        assert!(!ClaudeProfile.is_user_message(&nodes[1], 1));
    }
}
