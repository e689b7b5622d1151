//! Find a captured turn on the page again and bring it into view.
//!
//! Lookup escalates: an already tagged node, then a fresh hash of every visible node, then the
//! same two after a bulk load, and finally a plain prefix match on the turn's text for
//! identities that collided or drifted.

use crate::dom::{Document, DomNode};
use crate::identity::{MessageId, message_identity, utf16_prefix};
use crate::notify::Notifier;
use crate::protocol::Notification;
use crate::session::TrackerSession;
use crate::store::KeyValueStore;

impl<D, S, T> TrackerSession<D, S, T>
where
    D: Document,
    S: KeyValueStore,
    T: Notifier,
{
    /// Handle a panel highlight request. Prefers the text seen for `id` in this session over
    /// the text the panel sent.
    pub async fn highlight_message(&mut self, id: &MessageId, panel_content: Option<&str>) -> bool {
        let fallback = self
            .engine
            .content_for(id)
            .map(str::to_string)
            .or_else(|| panel_content.map(str::to_string))
            .unwrap_or_default();
        self.locate(id, &fallback).await
    }

    /// Scroll to and pulse the node for `id`. `false` when nothing matches.
    pub async fn locate(&mut self, id: &MessageId, fallback_content: &str) -> bool {
        if let Some(node) = self.find_on_page(id) {
            self.reveal(&node, id);
            return true;
        }

        tracing::debug!(message_id = %id, "not on page; bulk loading before retry");
        self.load_all_messages().await;
        if let Some(node) = self.find_on_page(id) {
            self.reveal(&node, id);
            return true;
        }

        if let Some(node) = self.find_by_prefix(id, fallback_content) {
            tracing::debug!(message_id = %id, "located by content prefix");
            self.reveal(&node, id);
            return true;
        }

        tracing::debug!(message_id = %id, "message not found");
        false
    }

    fn find_on_page(&self, id: &MessageId) -> Option<D::Node> {
        self.find_tagged(id).or_else(|| self.find_by_rehash(id))
    }

    fn find_tagged(&self, id: &MessageId) -> Option<D::Node> {
        self.page.find_tracked(id).filter(|node| node.is_connected())
    }

    fn find_by_rehash(&self, id: &MessageId) -> Option<D::Node> {
        let platform = self.platform();
        let node = self
            .page
            .select_all(platform.message_selector())
            .into_iter()
            .find(|node| &message_identity(&platform.content(node), self.scope_key()) == id)?;
        node.set_tracked_id(id);
        Some(node)
    }

    fn find_by_prefix(&self, id: &MessageId, content: &str) -> Option<D::Node> {
        if content.is_empty() {
            return None;
        }
        let prefix = utf16_prefix(content, self.config.locate_prefix_chars);
        let platform = self.platform();
        let node = self
            .page
            .select_all(platform.message_selector())
            .into_iter()
            .find(|node| platform.content(node).contains(prefix))?;
        node.set_tracked_id(id);
        Some(node)
    }

    fn reveal(&self, node: &D::Node, id: &MessageId) {
        node.scroll_into_view();
        node.pulse_highlight();
        self.notify(Notification::UpdateProgress {
            message_id: id.clone(),
            storage_key: self.scope_key().clone(),
            tab_id: self.token.clone(),
        });
    }
}
