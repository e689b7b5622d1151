//! gemini.google.com
//!
//! Turns are custom elements: `<user-query>` and `<model-response>`. The page scrolls inside
//! the Material sidenav content pane rather than the window.

use std::sync::LazyLock;

use crate::dom::{DomNode, Selector};
use crate::platforms::{PlatformProfile, text_of_first_or_self};

const USER_TAG: &str = "user-query";
const MODEL_TAG: &str = "model-response";

static MESSAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::tag(USER_TAG).or(Selector::tag(MODEL_TAG)));
static QUERY_TEXT: LazyLock<Selector> = LazyLock::new(|| Selector::class("query-text"));
static MARKDOWN: LazyLock<Selector> = LazyLock::new(|| Selector::class("markdown"));
static SCROLL_PANE: LazyLock<Selector> = LazyLock::new(|| Selector::class("mat-sidenav-content"));

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiProfile;

impl PlatformProfile for GeminiProfile {
    fn domains(&self) -> &'static [&'static str] {
        &["gemini.google.com"]
    }

    fn message_selector(&self) -> &'static Selector {
        &MESSAGE
    }

    fn is_user_message<N: DomNode>(&self, node: &N, _dom_index: usize) -> bool {
        node.tag_name().eq_ignore_ascii_case(USER_TAG)
    }

    fn is_assistant_message<N: DomNode>(&self, node: &N) -> bool {
        node.tag_name().eq_ignore_ascii_case(MODEL_TAG)
    }

    fn content<N: DomNode>(&self, node: &N) -> String {
        if node.select_first(&QUERY_TEXT).is_some() {
            text_of_first_or_self(node, &QUERY_TEXT)
        } else {
            text_of_first_or_self(node, &MARKDOWN)
        }
    }

    fn scroll_container(&self) -> Option<&'static Selector> {
        Some(&*SCROLL_PANE)
    }
}
