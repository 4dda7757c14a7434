//! Core type definitions for PageWarden
//!
//! These types are shared by the scanner, the mutation watcher and the
//! page-context guard, and are the payloads handed to the report sink.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Category
// =============================================================================

/// What kind of unwanted resource was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ad,
    Tracker,
    Miner,
}

impl Category {
    /// Classification order. The first category whose patterns match wins.
    pub const ORDER: [Category; 3] = [Category::Ad, Category::Tracker, Category::Miner];

    /// Wire name used in runtime messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ad => "ad",
            Self::Tracker => "tracker",
            Self::Miner => "miner",
        }
    }

    /// Parse from a runtime message `type` field.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ad" => Some(Self::Ad),
            "tracker" => Some(Self::Tracker),
            "miner" => Some(Self::Miner),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// =============================================================================
// Suppression Event
// =============================================================================

/// A single suppression, handed off to the report sink as soon as it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct SuppressionEvent {
    /// URL of the suppressed resource, or a fixed identifier when there is none
    /// (`inline-miner-script`, `iframe-ad`).
    pub identifier: String,
    pub category: Category,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl SuppressionEvent {
    pub fn new(identifier: impl Into<String>, category: Category, timestamp: u64) -> Self {
        Self {
            identifier: identifier.into(),
            category,
            timestamp,
        }
    }
}

/// Identifier reported for a removed inline miner script.
pub const INLINE_MINER_ID: &str = "inline-miner-script";

/// Identifier reported for a removed ad iframe without a source URL.
pub const IFRAME_AD_ID: &str = "iframe-ad";

// =============================================================================
// Scan Steps
// =============================================================================

bitflags::bitflags! {
    /// Page-scanner steps. Steps always run in declaration order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScanSteps: u8 {
        /// `<script src>` elements
        const SCRIPTS = 1 << 0;
        /// `<script>` elements without a source
        const INLINE_SCRIPTS = 1 << 1;
        /// `<iframe>` elements
        const IFRAMES = 1 << 2;
        /// Ad-container selectors (hidden, not removed)
        const STRUCTURAL = 1 << 3;
        /// Tracking pixels
        const IMAGES = 1 << 4;

        /// Everything, used on page load
        const ALL = 0x1F;
        /// The ad sweep re-run by the mutation watcher
        const AD_SWEEP = Self::SCRIPTS.bits() | Self::IFRAMES.bits() | Self::STRUCTURAL.bits();
    }
}

// =============================================================================
// Scan Report
// =============================================================================

/// Number of actions taken by one scan pass, per step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scripts: usize,
    pub inline_scripts: usize,
    pub iframes: usize,
    pub structural: usize,
    pub images: usize,
}

impl ScanReport {
    /// Total number of removed or hidden nodes.
    pub fn total(&self) -> usize {
        self.scripts + self.inline_scripts + self.iframes + self.structural + self.images
    }

    pub fn merge(&mut self, other: &ScanReport) {
        self.scripts += other.scripts;
        self.inline_scripts += other.inline_scripts;
        self.iframes += other.iframes;
        self.structural += other.structural;
        self.images += other.images;
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Rendered box of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxSize {
    pub width: f64,
    pub height: f64,
}

impl BoxSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Strictly larger than `min` on both axes.
    #[inline]
    pub fn exceeds(&self, min: f64) -> bool {
        self.width > min && self.height > min
    }
}

// =============================================================================
// Engine Options
// =============================================================================

/// Tunables shared by the scanner and the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    /// Trailing-edge debounce window for mutation batches
    pub debounce_ms: u32,
    /// Ad containers at or below this size on either axis are left alone
    pub min_visible_px: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            min_visible_px: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_names() {
        for category in Category::ORDER {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("popup"), None);
    }

    #[test]
    fn test_event_serializes_with_wire_names() {
        let event = SuppressionEvent::new("https://coinhive.com/lib.js", Category::Miner, 42);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"identifier":"https://coinhive.com/lib.js","category":"miner","timestamp":42}"#
        );
    }

    #[test]
    fn test_ad_sweep_steps() {
        assert!(ScanSteps::AD_SWEEP.contains(ScanSteps::SCRIPTS));
        assert!(ScanSteps::AD_SWEEP.contains(ScanSteps::IFRAMES));
        assert!(ScanSteps::AD_SWEEP.contains(ScanSteps::STRUCTURAL));
        assert!(!ScanSteps::AD_SWEEP.contains(ScanSteps::IMAGES));
        assert!(!ScanSteps::AD_SWEEP.contains(ScanSteps::INLINE_SCRIPTS));
    }

    #[test]
    fn test_box_threshold_is_strict() {
        assert!(!BoxSize::new(10.0, 50.0).exceeds(10.0));
        assert!(!BoxSize::new(5.0, 5.0).exceeds(10.0));
        assert!(BoxSize::new(11.0, 11.0).exceeds(10.0));
    }
}
