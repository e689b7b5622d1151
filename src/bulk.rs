//! Bulk loader: sweep the conversation from top to bottom so a virtualized list mounts every
//! turn, capturing at each stop, then put the reader back where they were.

use tokio::time::sleep;

use crate::dom::{Document, DomNode, ScrollTarget, Selector};
use crate::notify::Notifier;
use crate::platforms::Platform;
use crate::session::TrackerSession;
use crate::store::KeyValueStore;

/// The element the sweep scrolls: the platform's override when present, else the nearest
/// scrollable `main` or ancestor below `body`, else the window.
pub fn find_scroll_container<D: Document>(page: &D, platform: Platform) -> ScrollTarget<D::Node> {
    if let Some(selector) = platform.scroll_container()
        && let Some(node) = page.select_first(selector)
    {
        return ScrollTarget::Element(node);
    }

    let mut cursor = page.select_first(&Selector::tag("main"));
    while let Some(node) = cursor {
        let tag = node.tag_name();
        if tag == "body" || tag == "html" {
            break;
        }
        if node.is_scrollable() {
            return ScrollTarget::Element(node);
        }
        cursor = node.parent();
    }
    ScrollTarget::Window
}

/// Evenly spaced offsets from 0 to `max_scroll`, both ends included.
pub fn sweep_offsets(max_scroll: f64, steps: u32) -> Vec<f64> {
    let steps = steps.max(1);
    let stride = max_scroll / f64::from(steps);
    (0..=steps).map(|i| stride * f64::from(i)).collect()
}

impl<D, S, T> TrackerSession<D, S, T>
where
    D: Document,
    S: KeyValueStore,
    T: Notifier,
{
    /// Sweep the page and capture at every stop. Returns the scroll offset that was restored.
    ///
    /// The step count is fixed; a container that keeps growing is simply not chased.
    pub async fn load_all_messages(&mut self) -> f64 {
        let bulk = self.config.bulk_load.clone();
        let target = find_scroll_container(&self.page, self.platform());
        let original = self.page.scroll_metrics(&target).top;
        tracing::debug!(
            original,
            window = matches!(target, ScrollTarget::Window),
            steps = bulk.steps,
            "bulk load started"
        );

        self.page.scroll_to(&target, 0.0);
        sleep(bulk.settle()).await;

        let max_scroll = self.page.scroll_metrics(&target).max_scroll();
        for offset in sweep_offsets(max_scroll, bulk.steps) {
            self.page.scroll_to(&target, offset);
            sleep(bulk.step_pause()).await;
            self.capture().await;
        }

        self.page.scroll_to(&target, max_scroll);
        sleep(bulk.settle()).await;
        self.capture().await;

        self.page.scroll_to(&target, original);
        tracing::debug!(max_scroll, restored = original, "bulk load finished");
        original
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::fixture::{FixturePage, MessageSpec, PageSpec};

    #[test]
    fn offsets_cover_both_ends() {
        assert_eq!(sweep_offsets(800.0, 8).len(), 9);
        assert_eq!(sweep_offsets(800.0, 8)[1], 100.0);
        assert_eq!(sweep_offsets(800.0, 8)[8], 800.0);
        assert_eq!(sweep_offsets(0.0, 0), vec![0.0, 0.0]);
    }

    #[test]
    fn gemini_uses_sidenav_pane() {
        let mut spec = PageSpec::new("https://gemini.google.com/app/1")
            .message(MessageSpec::gemini_user("hello there gemini", 0.0));
        spec.main_class = Some("mat-sidenav-content".to_string());
        let page = FixturePage::new(spec);

        match find_scroll_container(&page, Platform::Gemini) {
            ScrollTarget::Element(node) => assert_eq!(node.tag_name(), "main"),
            ScrollTarget::Window => panic!("expected the sidenav pane"),
        }
    }

    #[test]
    fn scrollable_main_beats_window() {
        let mut spec = PageSpec::new("https://claude.ai/chat/1");
        spec.main_scrolls = true;
        spec.content_height = Some(5_000.0);
        let page = FixturePage::new(spec);
        assert!(matches!(
            find_scroll_container(&page, Platform::Claude),
            ScrollTarget::Element(_)
        ));

        let plain = FixturePage::new(PageSpec::new("https://claude.ai/chat/1"));
        assert_eq!(find_scroll_container(&plain, Platform::Claude), ScrollTarget::Window);
    }
}
