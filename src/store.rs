//! Persisted conversations.
//!
//! One JSON value per scope key in a key-value store. Records are written whole: `merge`
//! appends turns whose identity is not yet present, `replace` swaps the full message list
//! after a rebuild. There are no row-level updates, and no lock is held across the store
//! round trip, so both operations must stay idempotent by identity.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::identity::{MessageId, ScopeKey, SessionToken, utf16_prefix};

/// Prefix shared by every conversation key.
pub const SCOPE_KEY_PREFIX: &str = "chat_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredMessage")]
pub struct MessageRecord {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub dom_order_index: usize,
}

/// Every layout a message has been persisted in. Older records carry `timestamp` and
/// `domPosition`, the oldest only a sequential `index`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    id: MessageId,
    role: Role,
    content: String,
    summary: String,
    #[serde(alias = "timestamp")]
    created_at: DateTime<Utc>,
    dom_order_index: Option<usize>,
    dom_position: Option<usize>,
    index: Option<usize>,
}

impl TryFrom<StoredMessage> for MessageRecord {
    type Error = String;

    fn try_from(stored: StoredMessage) -> std::result::Result<Self, Self::Error> {
        let dom_order_index = stored
            .dom_order_index
            .or(stored.dom_position)
            .or(stored.index)
            .ok_or_else(|| format!("message {} has no position", stored.id))?;
        Ok(Self {
            id: stored.id,
            role: stored.role,
            content: stored.content,
            summary: stored.summary,
            created_at: stored.created_at,
            dom_order_index,
        })
    }
}

impl MessageRecord {
    /// A confirmed user turn, stamped now.
    pub fn user_turn(id: MessageId, content: String, dom_order_index: usize, summary_chars: usize) -> Self {
        let summary = summarize(&content, summary_chars);
        Self {
            id,
            role: Role::User,
            content,
            summary,
            created_at: Utc::now(),
            dom_order_index,
        }
    }
}

/// First `max_units` UTF-16 code units, with an ellipsis when anything was cut.
pub fn summarize(content: &str, max_units: usize) -> String {
    let head = utf16_prefix(content, max_units);
    if head.len() < content.len() {
        format!("{head}...")
    } else {
        head.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(alias = "tabId")]
    pub session_token: SessionToken,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl ConversationRecord {
    pub fn empty(meta: &ConversationMeta) -> Self {
        Self {
            url: meta.url.clone(),
            title: meta.title.clone(),
            created_at: Utc::now(),
            session_token: meta.session_token.clone(),
            messages: Vec::new(),
        }
    }
}

/// Page details stamped on a conversation when it is first written or rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMeta {
    pub url: String,
    pub title: String,
    pub session_token: SessionToken,
}

#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Process-local store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as an unreachable extension store would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a raw value, bypassing the conversation schema.
    pub fn insert_raw(&self, key: &str, value: Value) {
        self.entries.lock().insert(key.to_string(), value);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(TrackerError::store("memory store marked unavailable"))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

/// Whole-file JSON object store, rewritten atomically on every `set`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| TrackerError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// Conversation-level view over a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct ConversationStore<S> {
    kv: S,
}

impl<S: KeyValueStore> ConversationStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Stored conversation with messages in DOM order. Malformed entries read as absent.
    pub async fn load(&self, scope: &ScopeKey) -> Result<Option<ConversationRecord>> {
        let mut record = self.read(scope).await?;
        if let Some(record) = record.as_mut() {
            record.messages.sort_by_key(|m| m.dom_order_index);
        }
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<ScopeKey>> {
        Ok(self
            .kv
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(SCOPE_KEY_PREFIX))
            .map(ScopeKey::new)
            .collect())
    }

    /// Append every record whose identity is not stored yet; existing records are never
    /// touched.
    pub async fn merge(
        &self,
        scope: &ScopeKey,
        meta: &ConversationMeta,
        records: Vec<MessageRecord>,
    ) -> Result<MergeOutcome> {
        if records.is_empty() {
            return Ok(MergeOutcome::default());
        }
        let mut conversation = self
            .read(scope)
            .await?
            .unwrap_or_else(|| ConversationRecord::empty(meta));

        let mut seen: FxHashSet<MessageId> =
            conversation.messages.iter().map(|m| m.id.clone()).collect();
        let mut outcome = MergeOutcome::default();
        for record in records {
            if seen.insert(record.id.clone()) {
                conversation.messages.push(record);
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        if outcome.added > 0 {
            self.write(scope, &conversation).await?;
        }
        tracing::debug!(
            scope_key = %scope,
            added = outcome.added,
            duplicates = outcome.duplicates,
            total = conversation.messages.len(),
            "merged captured turns"
        );
        Ok(outcome)
    }

    /// Overwrite the conversation with exactly `records` (first occurrence of an identity
    /// wins).
    pub async fn replace(
        &self,
        scope: &ScopeKey,
        meta: &ConversationMeta,
        records: Vec<MessageRecord>,
    ) -> Result<()> {
        let mut conversation = ConversationRecord::empty(meta);
        let mut seen = FxHashSet::default();
        conversation.messages = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        self.write(scope, &conversation).await?;
        tracing::debug!(
            scope_key = %scope,
            total = conversation.messages.len(),
            "replaced conversation"
        );
        Ok(())
    }

    async fn read(&self, scope: &ScopeKey) -> Result<Option<ConversationRecord>> {
        let Some(raw) = self.kv.get(scope.as_str()).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<ConversationRecord>(raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(scope_key = %scope, error = %e, "ignoring malformed conversation record");
                Ok(None)
            }
        }
    }

    async fn write(&self, scope: &ScopeKey, conversation: &ConversationRecord) -> Result<()> {
        let value = serde_json::to_value(conversation)?;
        self.kv.set(scope.as_str(), value).await
    }
}
