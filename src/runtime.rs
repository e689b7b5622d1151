//! Cooperative event loop for one page.
//!
//! Everything runs on a single task: the capture timer, the URL-change timer, scroll events
//! with their trailing re-check, and inbound panel requests. A request that triggers a bulk
//! load holds the loop until the sweep finishes.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};

use crate::dom::Document;
use crate::notify::Notifier;
use crate::protocol::{Request, Response};
use crate::session::TrackerSession;
use crate::store::KeyValueStore;

/// Input delivered to a running session.
#[derive(Debug)]
pub enum PageEvent {
    /// The page or its scroll container scrolled.
    Scrolled,
    /// A panel request; the response goes back on `reply`.
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
}

impl<D, S, T> TrackerSession<D, S, T>
where
    D: Document,
    S: KeyValueStore,
    T: Notifier,
{
    pub async fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Ready {
                success: true,
                ready: true,
                tab_id: self.token.clone(),
            },
            Request::GetTabId => Response::TabId {
                tab_id: self.token.clone(),
            },
            Request::ScanNow => {
                self.capture().await;
                Response::Done {
                    success: true,
                    tab_id: Some(self.token.clone()),
                }
            }
            Request::LoadAllMessages => {
                self.load_all_messages().await;
                Response::Done {
                    success: true,
                    tab_id: Some(self.token.clone()),
                }
            }
            Request::GetCurrentPosition => Response::Position {
                message_id: self.current_position(),
                tab_id: self.token.clone(),
            },
            Request::HighlightMessage {
                message_id,
                message_content,
                ..
            } => {
                let found = self
                    .highlight_message(&message_id, message_content.as_deref())
                    .await;
                Response::Done {
                    success: found,
                    tab_id: None,
                }
            }
        }
    }

    /// Raw-JSON entry point for transport bindings. Unknown actions get no reply.
    pub async fn handle_message(&mut self, payload: &Value) -> Option<Value> {
        let request = Request::parse(payload)?;
        let response = self.handle_request(request).await;
        match serde_json::to_value(&response) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "could not encode response");
                None
            }
        }
    }

    /// Drive the session until `events` closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<PageEvent>) {
        let start = Instant::now();
        let poll = self.config.poll_interval();
        let mut capture_timer = interval_at(start + poll, poll);
        capture_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let url_period = self.config.url_check_interval();
        let mut url_timer = interval_at(start + url_period, url_period);
        url_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let initial = sleep(self.config.initial_capture_delay());
        tokio::pin!(initial);
        let mut initial_done = false;
        let mut settle_deadline: Option<Instant> = None;

        tracing::debug!(scope_key = %self.scope_key(), "tracker loop started");
        loop {
            let deadline = settle_deadline;
            let settle = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                event = events.recv() => match event {
                    None => {
                        tracing::debug!("page event channel closed; tracker loop stopping");
                        break;
                    }
                    Some(PageEvent::Scrolled) => {
                        self.report_position();
                        settle_deadline = Some(Instant::now() + self.config.scroll_settle());
                    }
                    Some(PageEvent::Request { request, reply }) => {
                        let response = self.handle_request(request).await;
                        if reply.send(response).is_err() {
                            tracing::debug!("requester went away before the reply");
                        }
                    }
                },
                _ = &mut initial, if !initial_done => {
                    initial_done = true;
                    self.capture().await;
                }
                _ = capture_timer.tick() => {
                    self.capture().await;
                }
                _ = url_timer.tick() => {
                    self.check_url_change();
                }
                _ = settle => {
                    settle_deadline = None;
                    self.report_position();
                }
            }
        }
    }
}
