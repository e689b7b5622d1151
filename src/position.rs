//! Which tracked turn the reader is on.
//!
//! Scoring favours a node whose top edge sits in a narrow band just below the viewport top;
//! everything else is pushed back by a flat penalty. That picks "the next thing to read"
//! rather than whatever is centred.

use crate::config::PositionConfig;
use crate::dom::{Document, DomNode};
use crate::identity::MessageId;
use crate::notify::Notifier;
use crate::protocol::Notification;
use crate::session::TrackerSession;
use crate::store::KeyValueStore;

/// Lower is better.
pub fn score(top: f64, config: &PositionConfig) -> f64 {
    if (0.0..=config.top_bias_px).contains(&top) {
        top
    } else {
        top.abs() + config.off_band_penalty
    }
}

/// Best-scoring tracked node among `nodes`; ties go to the earlier node. Nodes without an
/// identity and nodes starting below the viewport are skipped.
pub fn best_candidate<N: DomNode>(
    nodes: &[N],
    viewport_height: f64,
    config: &PositionConfig,
) -> Option<MessageId> {
    let mut best: Option<(f64, MessageId)> = None;
    for node in nodes {
        let Some(id) = node.tracked_id() else {
            continue;
        };
        let top = node.top_offset();
        if top > viewport_height {
            continue;
        }
        let s = score(top, config);
        if best.as_ref().is_none_or(|(current, _)| s < *current) {
            best = Some((s, id));
        }
    }
    best.map(|(_, id)| id)
}

/// Share of the conversation read when the reader is on the `position`-th turn (1-based) of
/// `total`, as the panel shows it. `None` when there is nothing to measure.
pub fn progress_fraction(position: usize, total: usize) -> Option<f64> {
    if total <= 1 {
        return None;
    }
    let remaining = total.saturating_sub(position) as f64;
    Some((remaining / (total - 1) as f64).clamp(0.0, 1.0))
}

impl<D, S, T> TrackerSession<D, S, T>
where
    D: Document,
    S: KeyValueStore,
    T: Notifier,
{
    pub fn current_position(&self) -> Option<MessageId> {
        let nodes = self.page.select_all(self.platform().message_selector());
        best_candidate(&nodes, self.page.viewport_height(), &self.config.position)
    }

    /// Send `updateProgress` for the current position, if there is one.
    pub fn report_position(&self) -> Option<MessageId> {
        let id = self.current_position()?;
        tracing::trace!(message_id = %id, "reporting position");
        self.notify(Notification::UpdateProgress {
            message_id: id.clone(),
            storage_key: self.scope_key().clone(),
            tab_id: self.token.clone(),
        });
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::fixture::{FixturePage, MessageSpec, PageSpec};
    use crate::dom::Selector;

    #[test]
    fn band_scores_by_offset_and_penalizes_the_rest() {
        let cfg = PositionConfig::default();
        assert_eq!(score(0.0, &cfg), 0.0);
        assert_eq!(score(120.0, &cfg), 120.0);
        assert_eq!(score(121.0, &cfg), 621.0);
        assert_eq!(score(-40.0, &cfg), 540.0);
    }

    fn tagged_page(tops: &[f64]) -> FixturePage {
        let mut spec = PageSpec::new("https://chatgpt.com/c/1");
        for (i, top) in tops.iter().enumerate() {
            spec = spec.message(MessageSpec::chatgpt("user", &format!("turn number {i}"), *top));
        }
        let page = FixturePage::new(spec);
        for i in 0..tops.len() {
            page.message(i).set_tracked_id(&MessageId::new(format!("m{i}")));
        }
        page
    }

    #[test]
    fn picks_node_in_band_over_closer_node_above() {
        let page = tagged_page(&[-30.0, 90.0, 500.0]);
        let nodes = page.select_all(&Selector::attr("data-message-author-role"));
        let best = best_candidate(&nodes, 800.0, &PositionConfig::default());
        assert_eq!(best, Some(MessageId::new("m1")));
    }

    #[test]
    fn ignores_untracked_and_below_viewport_nodes() {
        let page = tagged_page(&[900.0, 1200.0]);
        let nodes = page.select_all(&Selector::attr("data-message-author-role"));
        assert_eq!(best_candidate(&nodes, 800.0, &PositionConfig::default()), None);

        let page = FixturePage::new(
            PageSpec::new("https://chatgpt.com/c/1")
                .message(MessageSpec::chatgpt("user", "never scanned", 10.0)),
        );
        let nodes = page.select_all(&Selector::attr("data-message-author-role"));
        assert_eq!(best_candidate(&nodes, 800.0, &PositionConfig::default()), None);
    }

    #[test]
    fn ties_go_to_first_encountered() {
        let page = tagged_page(&[-200.0, 200.0]);
        let nodes = page.select_all(&Selector::attr("data-message-author-role"));
        let best = best_candidate(&nodes, 800.0, &PositionConfig::default());
        assert_eq!(best, Some(MessageId::new("m0")));
    }

    #[test]
    fn progress_fraction_matches_panel() {
        assert_eq!(progress_fraction(1, 1), None);
        assert_eq!(progress_fraction(1, 5), Some(1.0));
        assert_eq!(progress_fraction(5, 5), Some(0.0));
        assert_eq!(progress_fraction(3, 5), Some(0.5));
        assert_eq!(progress_fraction(9, 5), Some(0.0));
    }
}
