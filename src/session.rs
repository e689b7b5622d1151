//! The per-page controller.
//!
//! A [`TrackerSession`] is created once per page load on a supported site. It owns the page
//! handle, the conversation store, the outbound notifier and the capture engine, and every
//! public entry point absorbs its own failures: the timers must keep running after a bad scan.

use tokio::time::Instant;

use crate::capture::{CaptureEngine, CapturePlan};
use crate::config::EngineConfig;
use crate::dom::Document;
use crate::identity::{MessageId, ScopeKey, SessionToken};
use crate::notify::Notifier;
use crate::platforms::Platform;
use crate::protocol::Notification;
use crate::store::{ConversationMeta, ConversationRecord, ConversationStore, KeyValueStore};

/// Result of one capture pass, after persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Number of turns newly added to the stored conversation.
    Appended(usize),
    /// The stored conversation was replaced with this many turns.
    Rebuilt(usize),
    /// The store rejected the write; the turns will be offered again next pass.
    Failed,
}

pub struct TrackerSession<D, S, T> {
    pub(crate) page: D,
    pub(crate) store: ConversationStore<S>,
    pub(crate) notifier: T,
    pub(crate) config: EngineConfig,
    pub(crate) token: SessionToken,
    pub(crate) current_url: String,
    pub(crate) engine: CaptureEngine,
}

impl<D, S, T> TrackerSession<D, S, T>
where
    D: Document,
    S: KeyValueStore,
    T: Notifier,
{
    /// Attach to `page` with a fresh tab session token. `None` on unsupported sites.
    pub fn attach(page: D, kv: S, notifier: T, config: EngineConfig) -> Option<Self> {
        Self::attach_with_token(page, kv, notifier, config, SessionToken::generate())
    }

    pub fn attach_with_token(
        page: D,
        kv: S,
        notifier: T,
        config: EngineConfig,
        token: SessionToken,
    ) -> Option<Self> {
        let Some(hostname) = page.hostname() else {
            tracing::debug!(href = %page.href(), "page has no hostname; tracker stays inert");
            return None;
        };
        let Some(platform) = Platform::detect(&hostname) else {
            tracing::debug!(%hostname, "no platform profile for host; tracker stays inert");
            return None;
        };

        if let Err(e) = page.store_session_value(SessionToken::SLOT, token.as_str()) {
            tracing::debug!(error = %e, "could not write tab session token");
        }

        let current_url = page.href();
        let scope = ScopeKey::derive(&current_url, &token);
        tracing::info!(?platform, scope_key = %scope, "tracker attached");

        Some(Self {
            engine: CaptureEngine::new(platform, config.clone(), scope),
            page,
            store: ConversationStore::new(kv),
            notifier,
            config,
            token,
            current_url,
        })
    }

    pub fn page(&self) -> &D {
        &self.page
    }

    pub fn store(&self) -> &ConversationStore<S> {
        &self.store
    }

    pub fn notifier(&self) -> &T {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &CaptureEngine {
        &self.engine
    }

    pub fn platform(&self) -> Platform {
        self.engine.platform()
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn scope_key(&self) -> &ScopeKey {
        self.engine.scope()
    }

    /// Start a fresh scope if the page navigated since the last check.
    pub fn check_url_change(&mut self) -> bool {
        let url = self.page.href();
        if url == self.current_url {
            return false;
        }
        let scope = ScopeKey::derive(&url, &self.token);
        tracing::info!(from = %self.current_url, to = %url, scope_key = %scope, "page navigated; new scope");
        self.current_url = url;
        self.engine.reset(scope);
        true
    }

    /// One capture pass: rescope if needed, diff, persist, then report the viewport position.
    pub async fn capture(&mut self) -> CaptureOutcome {
        self.check_url_change();
        let plan = self.engine.run_pass(&self.page, Instant::now());
        let outcome = self.persist(plan).await;
        self.report_position();
        outcome
    }

    /// The stored conversation for the current scope, sorted. Store failures read as absent.
    pub async fn stored_conversation(&self) -> Option<ConversationRecord> {
        match self.store.load(self.scope_key()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(scope_key = %self.scope_key(), error = %e, "could not read conversation");
                None
            }
        }
    }

    async fn persist(&mut self, plan: CapturePlan) -> CaptureOutcome {
        let scope = self.scope_key().clone();
        let meta = self.conversation_meta();
        match plan {
            CapturePlan::Append(records) if records.is_empty() => CaptureOutcome::Appended(0),
            CapturePlan::Append(records) => {
                let ids: Vec<MessageId> = records.iter().map(|r| r.id.clone()).collect();
                match self.store.merge(&scope, &meta, records).await {
                    Ok(merged) => CaptureOutcome::Appended(merged.added),
                    Err(e) => {
                        tracing::warn!(scope_key = %scope, error = %e, "could not store captured turns");
                        self.engine.forget_saved(&ids);
                        CaptureOutcome::Failed
                    }
                }
            }
            CapturePlan::Rebuild(records) => {
                let count = records.len();
                match self.store.replace(&scope, &meta, records).await {
                    Ok(()) => {
                        self.notify(Notification::ConversationRebuilt {
                            storage_key: scope,
                            tab_id: self.token.clone(),
                        });
                        CaptureOutcome::Rebuilt(count)
                    }
                    Err(e) => {
                        tracing::warn!(scope_key = %scope, error = %e, "could not store rebuilt conversation");
                        self.engine.defer_rebuild();
                        CaptureOutcome::Failed
                    }
                }
            }
        }
    }

    fn conversation_meta(&self) -> ConversationMeta {
        let title = self.page.title();
        let title = if title.trim().is_empty() {
            format!("{} Chat", self.platform().domain())
        } else {
            title
        };
        ConversationMeta {
            url: self.page.href(),
            title,
            session_token: self.token.clone(),
        }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.send(&notification) {
            tracing::debug!(error = %e, "notification dropped");
        }
    }
}
