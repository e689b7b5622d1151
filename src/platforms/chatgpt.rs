//! chatgpt.com (and the legacy chat.openai.com host)
//!
//! Turns carry their role in `data-message-author-role`, which makes classification exact.
//! The text lives in a markdown container for assistant turns and a pre-wrap block for user
//! turns; the wrapper also holds buttons and labels we don't want in the content.

use std::sync::LazyLock;

use crate::dom::{DomNode, Selector};
use crate::platforms::{PlatformProfile, text_of_first_or_self};

const ROLE_ATTR: &str = "data-message-author-role";

static MESSAGE: LazyLock<Selector> = LazyLock::new(|| Selector::attr(ROLE_ATTR));
static CONTENT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::class("markdown")
        .or(Selector::attr("data-message-content"))
        .or(Selector::class("whitespace-pre-wrap"))
});

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatGptProfile;

impl PlatformProfile for ChatGptProfile {
    fn domains(&self) -> &'static [&'static str] {
        &["chatgpt.com", "chat.openai.com"]
    }

    fn message_selector(&self) -> &'static Selector {
        &MESSAGE
    }

    fn is_user_message<N: DomNode>(&self, node: &N, _dom_index: usize) -> bool {
        node.attribute(ROLE_ATTR).as_deref() == Some("user")
    }

    fn is_assistant_message<N: DomNode>(&self, node: &N) -> bool {
        node.attribute(ROLE_ATTR).as_deref() == Some("assistant")
    }

    fn content<N: DomNode>(&self, node: &N) -> String {
        text_of_first_or_self(node, &CONTENT)
    }
}
