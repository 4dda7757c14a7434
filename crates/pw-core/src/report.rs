//! Reporting suppressions
//!
//! Every suppression goes through a [`Recorder`], which stamps it, updates
//! the per-page [`SeenHosts`] set and action counters, and hands the event to
//! the [`ReportSink`]. Reporting is fire-and-forget: a failed send is logged
//! and dropped, never retried.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::types::{Category, SuppressionEvent};
use crate::url::normalized_host;

// =============================================================================
// Sink
// =============================================================================

/// Failure handing an event to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("Messaging runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to send report: {0}")]
    Send(String),
}

/// The external collaborator that counts and stores suppressions.
///
/// It owns hostname deduplication across pages, counter increments and the
/// retained history.
pub trait ReportSink {
    fn report(&self, event: SuppressionEvent) -> Result<(), ReportError>;
}

impl<S: ReportSink + ?Sized> ReportSink for Rc<S> {
    fn report(&self, event: SuppressionEvent) -> Result<(), ReportError> {
        (**self).report(event)
    }
}

/// Runtime message the browser sink sends for each event.
///
/// Wire shape: `{"action": "blockAd", "url": "...", "type": "ad"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct BlockMessage {
    pub action: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: Category,
}

impl BlockMessage {
    pub const ACTION: &'static str = "blockAd";
}

impl From<&SuppressionEvent> for BlockMessage {
    fn from(event: &SuppressionEvent) -> Self {
        Self {
            action: Self::ACTION.to_string(),
            url: event.identifier.clone(),
            kind: event.category,
        }
    }
}

// =============================================================================
// Seen Hosts
// =============================================================================

/// Hostnames already counted on this page load. Only grows.
#[derive(Debug, Clone, Default)]
pub struct SeenHosts {
    hosts: HashSet<String>,
}

impl SeenHosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the host of `identifier`. Returns `true` the first time a host
    /// is seen. Identifiers that are not URLs are ignored.
    pub fn observe(&mut self, identifier: &str) -> bool {
        match normalized_host(identifier) {
            Some(host) => self.hosts.insert(host),
            None => false,
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(&host.to_ascii_lowercase())
    }

    /// Distinct-site count.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Per-page action counters, removals and hides alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCounts {
    pub ads: u32,
    pub trackers: u32,
    pub miners: u32,
    /// Actions that produced a report
    pub reported: u32,
    pub distinct_sites: u32,
}

impl ActionCounts {
    fn bump(&mut self, category: Category) {
        match category {
            Category::Ad => self.ads += 1,
            Category::Tracker => self.trackers += 1,
            Category::Miner => self.miners += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.ads + self.trackers + self.miners
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// Milliseconds since the Unix epoch.
pub type Clock = Box<dyn Fn() -> u64>;

/// Front door for every suppression on one page load.
pub struct Recorder {
    sink: Box<dyn ReportSink>,
    clock: Clock,
    seen_hosts: SeenHosts,
    counts: ActionCounts,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("seen_hosts", &self.seen_hosts)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    pub fn new<S, C>(sink: S, clock: C) -> Self
    where
        S: ReportSink + 'static,
        C: Fn() -> u64 + 'static,
    {
        Self {
            sink: Box::new(sink),
            clock: Box::new(clock),
            seen_hosts: SeenHosts::new(),
            counts: ActionCounts::default(),
        }
    }

    /// A resource was removed or blocked and has a reportable identifier.
    pub fn suppressed(&mut self, identifier: &str, category: Category) {
        self.counts.bump(category);
        self.counts.reported += 1;
        if self.seen_hosts.observe(identifier) {
            self.counts.distinct_sites = self.seen_hosts.len() as u32;
        }

        let event = SuppressionEvent::new(identifier, category, (self.clock)());
        log::debug!("Suppressed {} {}", category, identifier);

        if let Err(e) = self.sink.report(event) {
            log::warn!("Dropping report for {}: {}", identifier, e);
        }
    }

    /// An element was hidden but has no stable URL to report.
    pub fn counted(&mut self, category: Category) {
        self.counts.bump(category);
    }

    pub fn counts(&self) -> ActionCounts {
        self.counts
    }

    pub fn seen_hosts(&self) -> &SeenHosts {
        &self.seen_hosts
    }
}

// =============================================================================
// Memory Sink
// =============================================================================

/// Events kept by [`MemorySink`], matching the collaborator's history cap.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct EventLog {
    recent: VecDeque<SuppressionEvent>,
    received: usize,
    failing: bool,
}

/// In-memory sink keeping the most recent [`HISTORY_LIMIT`] events.
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    log: Rc<RefCell<EventLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every send fails, for exercising the drop path.
    pub fn failing() -> Self {
        let sink = Self::new();
        sink.log.borrow_mut().failing = true;
        sink
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<SuppressionEvent> {
        self.log.borrow().recent.iter().cloned().collect()
    }

    /// Total events received, including those evicted from the history.
    pub fn received(&self) -> usize {
        self.log.borrow().received
    }

    pub fn count(&self, category: Category) -> usize {
        self.log
            .borrow()
            .recent
            .iter()
            .filter(|e| e.category == category)
            .count()
    }
}

impl ReportSink for MemorySink {
    fn report(&self, event: SuppressionEvent) -> Result<(), ReportError> {
        let mut log = self.log.borrow_mut();
        if log.failing {
            return Err(ReportError::Send("sink closed".to_string()));
        }
        log.received += 1;
        log.recent.push_back(event);
        while log.recent.len() > HISTORY_LIMIT {
            log.recent.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Recorder, MemorySink) {
        let sink = MemorySink::new();
        (Recorder::new(sink.clone(), || 1_700_000_000_000), sink)
    }

    #[test]
    fn test_seen_hosts_counts_first_occurrence_only() {
        let mut seen = SeenHosts::new();
        let mut counts = Vec::new();
        for url in [
            "https://a.example/x.js",
            "https://b.example/y.js",
            "https://a.example/z.js",
            "https://c.example/w.js",
        ] {
            seen.observe(url);
            counts.push(seen.len());
        }
        assert_eq!(counts, vec![1, 2, 2, 3]);
    }

    #[test]
    fn test_seen_hosts_ignores_identifiers() {
        let mut seen = SeenHosts::new();
        assert!(!seen.observe("inline-miner-script"));
        assert!(seen.observe("https://A.example/x"));
        assert!(seen.contains("a.example"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_recorder_forwards_stamped_events() {
        let (mut recorder, sink) = recorder();
        recorder.suppressed("https://coinhive.com/lib.js", Category::Miner);
        recorder.counted(Category::Ad);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, Category::Miner);
        assert_eq!(events[0].timestamp, 1_700_000_000_000);

        let counts = recorder.counts();
        assert_eq!(counts.miners, 1);
        assert_eq!(counts.ads, 1);
        assert_eq!(counts.reported, 1);
        assert_eq!(counts.distinct_sites, 1);
    }

    #[test]
    fn test_recorder_survives_failing_sink() {
        let mut recorder = Recorder::new(MemorySink::failing(), || 0);
        recorder.suppressed("https://doubleclick.net/x", Category::Ad);
        assert_eq!(recorder.counts().ads, 1);
        assert_eq!(recorder.seen_hosts().len(), 1);
    }

    #[test]
    fn test_block_message_wire_shape() {
        let event = SuppressionEvent::new("https://doubleclick.net/x", Category::Ad, 3);
        let json = serde_json::to_value(BlockMessage::from(&event)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "blockAd", "url": "https://doubleclick.net/x", "type": "ad"})
        );
    }

    #[test]
    fn test_memory_sink_caps_history() {
        let sink = MemorySink::new();
        for i in 0..(HISTORY_LIMIT + 20) {
            sink.report(SuppressionEvent::new(format!("https://h{i}.example/"), Category::Ad, i as u64))
                .unwrap();
        }
        let events = sink.events();
        assert_eq!(events.len(), HISTORY_LIMIT);
        assert_eq!(events[0].timestamp, 20);
        assert_eq!(sink.received(), HISTORY_LIMIT + 20);
    }
}
