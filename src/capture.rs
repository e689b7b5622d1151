//! Capture engine: one pass samples the page, diffs it against the previous sample and decides
//! between appending newly completed user turns and rebuilding the whole conversation.
//!
//! A user turn is complete once some assistant turn follows it in document order. Turns seen
//! without a response wait in the pending set; if nothing answers them within the pending
//! timeout they are dropped so a later pass can pick the text up fresh.
//!
//! All per-page-session state lives in [`TrackingContext`] and is thrown away wholesale when
//! the scope key changes.

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::dom::{Document, DomNode, sort_document_order};
use crate::identity::{MessageId, ScopeKey, message_identity};
use crate::platforms::Platform;
use crate::store::MessageRecord;

/// A user turn observed without a response yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCandidate {
    pub first_seen: Instant,
    pub dom_index: usize,
    pub content: String,
}

/// Identities seen by one pass, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleSnapshot {
    ids: FxHashSet<MessageId>,
    order: Vec<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotChange {
    Stable,
    Disappeared,
    Reordered,
}

impl VisibleSnapshot {
    pub fn from_order(order: Vec<MessageId>) -> Self {
        Self {
            ids: order.iter().cloned().collect(),
            order,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn order(&self) -> &[MessageId] {
        &self.order
    }

    /// How `next` differs from `self`.
    ///
    /// Order is compared over identities present in both samples only, so turns appended at
    /// either end (new replies, older turns mounted by virtualization) do not count as a
    /// reorder.
    pub fn compare(&self, next: &VisibleSnapshot) -> SnapshotChange {
        if !self.is_empty() && self.order().iter().any(|id| !next.contains(id)) {
            return SnapshotChange::Disappeared;
        }
        let before = self.order().iter().filter(|id| next.contains(id));
        let after = next.order().iter().filter(|id| self.contains(id));
        if before.ne(after) {
            return SnapshotChange::Reordered;
        }
        SnapshotChange::Stable
    }
}

/// In-memory state of one page session under one scope key.
#[derive(Debug, Clone)]
pub struct TrackingContext {
    scope: ScopeKey,
    saved: FxHashSet<MessageId>,
    contents: FxHashMap<MessageId, String>,
    pending: FxHashMap<MessageId, PendingCandidate>,
    snapshot: VisibleSnapshot,
    /// Set when a rebuild could not be persisted; the next pass rebuilds regardless.
    rebuild_due: bool,
}

impl TrackingContext {
    pub fn new(scope: ScopeKey) -> Self {
        Self {
            scope,
            saved: FxHashSet::default(),
            contents: FxHashMap::default(),
            pending: FxHashMap::default(),
            snapshot: VisibleSnapshot::default(),
            rebuild_due: false,
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn is_saved(&self, id: &MessageId) -> bool {
        self.saved.contains(id)
    }

    pub fn pending(&self) -> &FxHashMap<MessageId, PendingCandidate> {
        &self.pending
    }

    pub fn snapshot(&self) -> &VisibleSnapshot {
        &self.snapshot
    }

    /// Forget tracking but keep the scope and snapshot; used by a rebuild.
    fn clear_tracking(&mut self) {
        self.saved.clear();
        self.contents.clear();
        self.pending.clear();
    }
}

/// One accepted message node from a scan.
#[derive(Debug, Clone)]
pub struct ScannedMessage<N> {
    pub node: N,
    /// Index among all message nodes in document order, filtered ones included.
    pub dom_index: usize,
    pub id: MessageId,
    pub content: String,
}

/// Every message node in document order, plus the subset that passed the noise filter.
#[derive(Debug, Clone)]
pub struct Scan<N> {
    pub nodes: Vec<N>,
    pub messages: Vec<ScannedMessage<N>>,
}

impl<N> Scan<N> {
    pub fn snapshot(&self) -> VisibleSnapshot {
        VisibleSnapshot::from_order(self.messages.iter().map(|m| m.id.clone()).collect())
    }
}

/// What a pass wants persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturePlan {
    /// Merge these newly completed turns; may be empty.
    Append(Vec<MessageRecord>),
    /// Replace the stored conversation with exactly these turns.
    Rebuild(Vec<MessageRecord>),
}

impl CapturePlan {
    pub fn records(&self) -> &[MessageRecord] {
        match self {
            CapturePlan::Append(records) | CapturePlan::Rebuild(records) => records,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureEngine {
    platform: Platform,
    config: EngineConfig,
    context: TrackingContext,
}

impl CaptureEngine {
    pub fn new(platform: Platform, config: EngineConfig, scope: ScopeKey) -> Self {
        Self {
            platform,
            config,
            context: TrackingContext::new(scope),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn scope(&self) -> &ScopeKey {
        self.context.scope()
    }

    pub fn context(&self) -> &TrackingContext {
        &self.context
    }

    /// Drop every piece of session state and start over under `scope`.
    pub fn reset(&mut self, scope: ScopeKey) {
        self.context = TrackingContext::new(scope);
    }

    /// Text last extracted for `id` in this scope.
    pub fn content_for(&self, id: &MessageId) -> Option<&str> {
        self.context.contents.get(id).map(String::as_str)
    }

    /// Sample the page: message nodes in document order, identities for the ones whose text
    /// passes the noise filter.
    pub fn scan<D: Document>(&self, page: &D) -> Scan<D::Node> {
        let mut nodes = page.select_all(self.platform.message_selector());
        sort_document_order(&mut nodes);

        let messages = nodes
            .iter()
            .enumerate()
            .filter_map(|(dom_index, node)| {
                let content = self.platform.content(node);
                if !self.config.accepts_content(&content) {
                    tracing::trace!(dom_index, len = content.len(), "skipping noise node");
                    return None;
                }
                Some(ScannedMessage {
                    node: node.clone(),
                    dom_index,
                    id: message_identity(&content, self.context.scope()),
                    content,
                })
            })
            .collect();

        Scan { nodes, messages }
    }

    /// One capture pass at `now`.
    pub fn run_pass<D: Document>(&mut self, page: &D, now: Instant) -> CapturePlan {
        let scan = self.scan(page);
        let snapshot = scan.snapshot();
        let change = self.context.snapshot.compare(&snapshot);

        if change != SnapshotChange::Stable || self.context.rebuild_due {
            tracing::info!(
                scope_key = %self.context.scope,
                ?change,
                retry = self.context.rebuild_due,
                previous = self.context.snapshot.len(),
                visible = snapshot.len(),
                "visible turns changed shape; rebuilding conversation"
            );
            let records = self.rebuild(&scan);
            self.context.snapshot = snapshot;
            self.context.rebuild_due = false;
            return CapturePlan::Rebuild(records);
        }

        self.context.snapshot = snapshot;
        let records = self.collect_completed(&scan, now);
        self.sweep_pending(now);
        CapturePlan::Append(records)
    }

    /// Re-derive the full conversation from `scan`, ignoring pending state.
    pub fn rebuild<N: DomNode>(&mut self, scan: &Scan<N>) -> Vec<MessageRecord> {
        self.context.clear_tracking();

        let mut records = Vec::new();
        for message in &scan.messages {
            self.track(message);
            if self.context.saved.contains(&message.id) {
                tracing::debug!(id = %message.id, "duplicate identity in rebuild; keeping first");
                continue;
            }
            if self.is_completed_user_turn(scan, message) {
                self.context.saved.insert(message.id.clone());
                records.push(self.record(message));
            }
        }
        records
    }

    /// Clear saved markers so a later pass materializes these turns again.
    pub fn forget_saved<'a>(&mut self, ids: impl IntoIterator<Item = &'a MessageId>) {
        for id in ids {
            self.context.saved.remove(id);
        }
    }

    /// Make the next pass rebuild even if the page looks unchanged.
    pub fn defer_rebuild(&mut self) {
        self.context.rebuild_due = true;
    }

    /// Evict pending turns older than the timeout along with their saved markers.
    pub fn sweep_pending(&mut self, now: Instant) {
        let timeout = self.config.pending_timeout();
        let expired: Vec<MessageId> = self
            .context
            .pending
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.first_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            tracing::debug!(id = %id, "pending turn expired without a response");
            self.context.pending.remove(&id);
            self.context.saved.remove(&id);
        }
    }

    fn collect_completed<N: DomNode>(&mut self, scan: &Scan<N>, now: Instant) -> Vec<MessageRecord> {
        let mut records = Vec::new();
        for message in &scan.messages {
            self.track(message);
            if self.context.saved.contains(&message.id)
                || !self.platform.is_user_message(&message.node, message.dom_index)
            {
                continue;
            }
            if self.platform.has_response_after(&scan.nodes, message.dom_index) {
                self.context.saved.insert(message.id.clone());
                self.context.pending.remove(&message.id);
                records.push(self.record(message));
            } else {
                self.context
                    .pending
                    .entry(message.id.clone())
                    .or_insert_with(|| PendingCandidate {
                        first_seen: now,
                        dom_index: message.dom_index,
                        content: message.content.clone(),
                    });
            }
        }
        if !records.is_empty() {
            tracing::debug!(
                scope_key = %self.context.scope,
                count = records.len(),
                pending = self.context.pending.len(),
                "completed user turns"
            );
        }
        records
    }

    fn is_completed_user_turn<N: DomNode>(&self, scan: &Scan<N>, message: &ScannedMessage<N>) -> bool {
        self.platform.is_user_message(&message.node, message.dom_index)
            && self.platform.has_response_after(&scan.nodes, message.dom_index)
    }

    fn track<N: DomNode>(&mut self, message: &ScannedMessage<N>) {
        message.node.set_tracked_id(&message.id);
        self.context
            .contents
            .insert(message.id.clone(), message.content.clone());
    }

    fn record<N>(&self, message: &ScannedMessage<N>) -> MessageRecord {
        MessageRecord::user_turn(
            message.id.clone(),
            message.content.clone(),
            message.dom_index,
            self.config.summary_chars,
        )
    }
}
