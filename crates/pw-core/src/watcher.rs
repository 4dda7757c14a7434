//! Mutation Watcher
//!
//! Debounces DOM mutation batches into a single re-check. The state machine:
//!
//! ```text
//! Idle --batch--> Pending --batch--> Pending (timer replaced)
//!                    |
//!                  fire --> Idle
//! any --disconnect--> Disconnected (terminal)
//! ```
//!
//! At most one timer is pending at any time. A fresh page load gets a fresh
//! watcher; a disconnected watcher never re-arms.

use std::collections::BTreeMap;

use crate::dom::{Dom, HideStyle};
use crate::report::Recorder;
use crate::scanner::PageScanner;
use crate::types::{Category, ScanReport, ScanSteps};

// =============================================================================
// Timers
// =============================================================================

/// One-shot timer source. When a scheduled timer elapses the host must call
/// [`MutationWatcher::fire`].
pub trait Timers {
    type Handle;

    fn schedule(&mut self, delay_ms: u32) -> Self::Handle;

    /// Cancelled timers never fire.
    fn cancel(&mut self, handle: Self::Handle);
}

/// Opaque id of a [`ManualTimers`] timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Deterministic timer source driven by [`ManualTimers::advance`].
#[derive(Debug, Default)]
pub struct ManualTimers {
    now_ms: u64,
    next_id: u64,
    pending: BTreeMap<TimerId, u64>,
    scheduled: usize,
    cancelled: usize,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and return the timers that elapsed, in due order.
    pub fn advance(&mut self, ms: u64) -> Vec<TimerId> {
        self.now_ms += ms;
        let now = self.now_ms;
        let mut due: Vec<(u64, TimerId)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(&id, &at)| (at, id))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.pending.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }
}

impl Timers for ManualTimers {
    type Handle = TimerId;

    fn schedule(&mut self, delay_ms: u32) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, self.now_ms + u64::from(delay_ms));
        self.scheduled += 1;
        id
    }

    fn cancel(&mut self, handle: TimerId) {
        if self.pending.remove(&handle).is_some() {
            self.cancelled += 1;
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Most added elements a pending batch holds. Older entries are dropped
/// first once the cap is reached.
pub const MAX_PENDING_NODES: usize = 1024;

/// Watcher state. `batch` holds the elements added since the timer was
/// first scheduled that are still attached, up to [`MAX_PENDING_NODES`].
#[derive(Debug)]
pub enum WatcherState<N, H> {
    Idle,
    Pending { timer: H, batch: Vec<N> },
    Disconnected,
}

/// What a timer firing did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireOutcome {
    /// Added nodes removed or hidden directly
    pub matched: usize,
    /// Full ad sweep, run only when something matched
    pub sweep: Option<ScanReport>,
}

#[derive(Debug)]
pub struct MutationWatcher<N, H> {
    state: WatcherState<N, H>,
    delay_ms: u32,
    rescans: usize,
}

impl<N, H> MutationWatcher<N, H> {
    /// A freshly armed watcher.
    pub fn new(delay_ms: u32) -> Self {
        Self {
            state: WatcherState::Idle,
            delay_ms,
            rescans: 0,
        }
    }

    pub fn state(&self) -> &WatcherState<N, H> {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, WatcherState::Pending { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, WatcherState::Disconnected)
    }

    /// Elements waiting for the pending timer.
    pub fn pending_len(&self) -> usize {
        match &self.state {
            WatcherState::Pending { batch, .. } => batch.len(),
            _ => 0,
        }
    }

    /// Number of times a pending timer fired.
    pub fn rescans(&self) -> usize {
        self.rescans
    }

    /// A mutation batch was observed. Restarts the debounce window.
    ///
    /// Elements detached since an earlier batch are dropped from the merged
    /// batch, which never grows past [`MAX_PENDING_NODES`].
    pub fn observe<D, T>(&mut self, added: Vec<N>, dom: &D, timers: &mut T)
    where
        D: Dom<Node = N>,
        T: Timers<Handle = H>,
    {
        match std::mem::replace(&mut self.state, WatcherState::Disconnected) {
            WatcherState::Disconnected => {}
            WatcherState::Idle => {
                let timer = timers.schedule(self.delay_ms);
                let mut batch = added;
                cap_batch(&mut batch);
                self.state = WatcherState::Pending { timer, batch };
            }
            WatcherState::Pending { timer, mut batch } => {
                timers.cancel(timer);
                batch.retain(|node| dom.is_attached(node));
                batch.extend(added);
                cap_batch(&mut batch);
                let timer = timers.schedule(self.delay_ms);
                self.state = WatcherState::Pending { timer, batch };
            }
        }
    }

    /// The pending timer elapsed. Checks every added node and, if any
    /// matched, re-runs the full ad sweep to catch secondary restructuring.
    /// Returns `None` when nothing was pending.
    pub fn fire<D>(
        &mut self,
        dom: &mut D,
        scanner: &PageScanner<'_>,
        recorder: &mut Recorder,
    ) -> Option<FireOutcome>
    where
        D: Dom<Node = N>,
    {
        let batch = match std::mem::replace(&mut self.state, WatcherState::Idle) {
            WatcherState::Pending { batch, .. } => batch,
            other => {
                self.state = other;
                return None;
            }
        };
        self.rescans += 1;

        let matched = batch
            .iter()
            .filter(|node| check_added_node(*node, dom, scanner, recorder))
            .count();

        let sweep = if matched > 0 {
            log::debug!("{} added node(s) matched, re-running ad sweep", matched);
            Some(scanner.scan(dom, ScanSteps::AD_SWEEP, recorder))
        } else {
            None
        };

        Some(FireOutcome { matched, sweep })
    }

    /// Stop watching for good. Cancels any pending timer.
    pub fn disconnect<T>(&mut self, timers: &mut T)
    where
        T: Timers<Handle = H>,
    {
        if let WatcherState::Pending { timer, .. } =
            std::mem::replace(&mut self.state, WatcherState::Disconnected)
        {
            timers.cancel(timer);
        }
    }
}

fn cap_batch<N>(batch: &mut Vec<N>) {
    if batch.len() > MAX_PENDING_NODES {
        let excess = batch.len() - MAX_PENDING_NODES;
        log::debug!("Mutation batch over capacity, dropping {} oldest node(s)", excess);
        batch.drain(..excess);
    }
}

fn check_added_node<D: Dom>(
    node: &D::Node,
    dom: &mut D,
    scanner: &PageScanner<'_>,
    recorder: &mut Recorder,
) -> bool {
    let classifier = scanner.classifier();
    let tag = dom.tag_name(node);

    // A script or iframe from a neutral URL still gets the class check below
    if tag == "script" || tag == "iframe" {
        if let Some(src) = dom.source(node).filter(|src| classifier.is_ad_script(src)) {
            return match dom.remove(node) {
                Ok(()) => {
                    recorder.suppressed(&src, Category::Ad);
                    true
                }
                Err(e) => {
                    log::debug!("Added {} already gone: {}", tag, e);
                    false
                }
            };
        }
    }

    let classes = dom.class_list(node);
    if dom.is_hidden(node) || !classifier.has_ad_class(classes.iter().map(String::as_str)) {
        return false;
    }
    if dom.box_size(node).height <= scanner.options().min_visible_px {
        return false;
    }
    match dom.hide(node, HideStyle::DisplayNone) {
        Ok(()) => {
            recorder.counted(Category::Ad);
            true
        }
        Err(e) => {
            log::debug!("Added ad container already gone: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::dom::{MemoryDom, MemoryElement, NodeId};
    use crate::report::MemorySink;
    use crate::types::EngineOptions;

    type Watcher = MutationWatcher<NodeId, TimerId>;

    struct Harness {
        classifier: Classifier,
        recorder: Recorder,
        sink: MemorySink,
        dom: MemoryDom,
        timers: ManualTimers,
        watcher: Watcher,
    }

    impl Harness {
        fn new() -> Self {
            let sink = MemorySink::new();
            Self {
                classifier: Classifier::builtin().unwrap(),
                recorder: Recorder::new(sink.clone(), || 0),
                sink,
                dom: MemoryDom::new(),
                timers: ManualTimers::new(),
                watcher: Watcher::new(1000),
            }
        }

        /// Advance time and fire the watcher for each elapsed timer.
        fn advance(&mut self, ms: u64) -> Vec<FireOutcome> {
            let scanner = PageScanner::new(&self.classifier, EngineOptions::default());
            self.timers
                .advance(ms)
                .into_iter()
                .filter_map(|_| self.watcher.fire(&mut self.dom, &scanner, &mut self.recorder))
                .collect()
        }
    }

    #[test]
    fn test_bursts_coalesce_into_one_rescan() {
        let mut h = Harness::new();
        for i in 0..5 {
            let node = h.dom.append(MemoryElement::new("p").with_class(&format!("para-{i}")));
            h.watcher.observe(vec![node], &h.dom, &mut h.timers);
            assert!(h.advance(200).is_empty());
        }
        assert_eq!(h.timers.pending(), 1);
        assert_eq!(h.timers.scheduled(), 5);
        assert_eq!(h.timers.cancelled(), 4);

        let fired = h.advance(1000);
        assert_eq!(fired.len(), 1);
        assert_eq!(h.watcher.rescans(), 1);
        assert!(!h.watcher.is_pending());
    }

    #[test]
    fn test_added_ad_script_triggers_sweep() {
        let mut h = Harness::new();
        // Already on the page but only caught by the sweep
        let container = h
            .dom
            .append(MemoryElement::new("div").with_id("sidebar-advert").with_size(300.0, 600.0));
        let script = h
            .dom
            .append(MemoryElement::script("https://securepubads.g.doubleclick.net/tag/js/gpt.js"));
        h.watcher.observe(vec![script], &h.dom, &mut h.timers);

        let fired = h.advance(1000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].matched, 1);
        let sweep = fired[0].sweep.unwrap();
        assert_eq!(sweep.structural, 1);
        assert!(h.dom.is_removed(script));
        assert!(h.dom.hidden_style(container).is_some());
        assert_eq!(h.sink.events()[0].category, Category::Ad);
    }

    #[test]
    fn test_added_ad_class_is_hidden() {
        let mut h = Harness::new();
        let tall = h
            .dom
            .append(MemoryElement::new("div").with_class("promo AdBox").with_size(5.0, 90.0));
        let flat = h
            .dom
            .append(MemoryElement::new("div").with_class("adbox").with_size(300.0, 4.0));
        h.watcher.observe(vec![tall, flat], &h.dom, &mut h.timers);

        let fired = h.advance(1000);
        assert_eq!(fired[0].matched, 1);
        assert_eq!(h.dom.hidden_style(tall), Some(HideStyle::DisplayNone));
        assert_eq!(h.dom.hidden_style(flat), None);
        // Hides are counted but not reported
        assert!(h.sink.events().is_empty());
        assert_eq!(h.recorder.counts().ads, 1);
    }

    #[test]
    fn test_no_match_skips_sweep() {
        let mut h = Harness::new();
        let node = h.dom.append(MemoryElement::script("https://example.com/app.js"));
        h.watcher.observe(vec![node], &h.dom, &mut h.timers);

        let fired = h.advance(1000);
        assert_eq!(fired, vec![FireOutcome { matched: 0, sweep: None }]);
        assert!(!h.dom.is_removed(node));
    }

    #[test]
    fn test_coalesced_batches_are_merged() {
        let mut h = Harness::new();
        let ad = h.dom.append(MemoryElement::script("https://cdn.taboola.com/libtrc/loader.js"));
        h.watcher.observe(vec![ad], &h.dom, &mut h.timers);
        let clean = h.dom.append(MemoryElement::new("p"));
        h.watcher.observe(vec![clean], &h.dom, &mut h.timers);

        let fired = h.advance(1000);
        assert_eq!(fired[0].matched, 1);
        assert!(h.dom.is_removed(ad));
    }

    #[test]
    fn test_detached_added_node_is_tolerated() {
        let mut h = Harness::new();
        let script = h.dom.append(MemoryElement::script("https://doubleclick.net/x.js"));
        h.watcher.observe(vec![script], &h.dom, &mut h.timers);
        h.dom.remove(&script).unwrap();

        let fired = h.advance(1000);
        assert_eq!(fired[0].matched, 0);
    }

    #[test]
    fn test_disconnect_cancels_and_is_terminal() {
        let mut h = Harness::new();
        let node = h.dom.append(MemoryElement::script("https://doubleclick.net/x.js"));
        h.watcher.observe(vec![node], &h.dom, &mut h.timers);
        h.watcher.disconnect(&mut h.timers);

        assert!(h.watcher.is_disconnected());
        assert_eq!(h.timers.pending(), 0);

        h.watcher.observe(vec![node], &h.dom, &mut h.timers);
        assert_eq!(h.timers.pending(), 0);
        assert!(h.advance(5000).is_empty());
        assert!(!h.dom.is_removed(node));
    }

    #[test]
    fn test_neutral_iframe_with_ad_class_is_hidden() {
        let mut h = Harness::new();
        let frame = h.dom.append(
            MemoryElement::new("iframe")
                .with_src("https://widgets.example.com/embed/frame.html")
                .with_class("sponsored-adframe")
                .with_size(300.0, 250.0),
        );
        h.watcher.observe(vec![frame], &h.dom, &mut h.timers);

        let fired = h.advance(1000);
        assert_eq!(fired[0].matched, 1);
        assert!(!h.dom.is_removed(frame));
        assert_eq!(h.dom.hidden_style(frame), Some(HideStyle::DisplayNone));
        assert_eq!(h.recorder.counts().ads, 1);
    }

    #[test]
    fn test_detached_nodes_pruned_on_merge() {
        let mut h = Harness::new();
        let a = h.dom.append(MemoryElement::new("div").with_class("adbox"));
        h.watcher.observe(vec![a], &h.dom, &mut h.timers);
        h.dom.remove(&a).unwrap();
        let b = h.dom.append(MemoryElement::new("p"));
        h.watcher.observe(vec![b], &h.dom, &mut h.timers);

        assert_eq!(h.watcher.pending_len(), 1);
    }

    #[test]
    fn test_pending_batch_is_bounded_under_churn() {
        let mut h = Harness::new();
        // A batch every 500ms keeps the 1000ms timer from ever firing
        for i in 0..10_000 {
            let kept = h.dom.append(MemoryElement::new("span"));
            let churned = h.dom.append(MemoryElement::new("span").with_id(&format!("tmp-{i}")));
            h.watcher.observe(vec![kept, churned], &h.dom, &mut h.timers);
            h.dom.remove(&churned).unwrap();
            assert!(h.advance(500).is_empty());
            assert!(h.watcher.pending_len() <= MAX_PENDING_NODES);
        }
        assert_eq!(h.watcher.pending_len(), MAX_PENDING_NODES);
        assert_eq!(h.timers.pending(), 1);

        let fired = h.advance(1000);
        assert_eq!(fired.len(), 1);
        assert_eq!(h.watcher.pending_len(), 0);
    }

    #[test]
    fn test_fire_while_idle_is_noop() {
        let mut h = Harness::new();
        let scanner = PageScanner::new(&h.classifier, EngineOptions::default());
        assert_eq!(h.watcher.fire(&mut h.dom, &scanner, &mut h.recorder), None);
    }
}
