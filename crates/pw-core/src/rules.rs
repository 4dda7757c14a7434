//! Built-in rule sets
//!
//! Static pattern collections for the three categories, plus the names the
//! page-context guard neutralizes. All substring patterns are lowercase and
//! are matched against a lowercased subject.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::types::Category;

// =============================================================================
// URL Patterns (scripts found in the DOM)
// =============================================================================

/// Ad-serving script URL fragments.
pub const AD_URL_PATTERNS: &[&str] = &[
    "doubleclick",
    "pagead",
    "googleads",
    "adsbygoogle",
    "amazon-adsystem",
    "taboola",
    "outbrain",
    "/ads/",
    "/ad.js",
    "/ads.js",
];

/// Analytics / tracking script URL fragments.
pub const TRACKER_URL_PATTERNS: &[&str] = &[
    "google-analytics",
    "analytics.google",
    "gtag",
    "facebook.com/tr",
    "segment.com",
    "mixpanel",
    "amplitude",
    "tracking",
];

/// Crypto-miner script URL fragments.
pub const MINER_URL_PATTERNS: &[&str] = &[
    "coinhive",
    "coin-hive",
    "crypto-loot",
    "cryptaloot",
    "jsecoin",
    "webminepool",
    "monerominer",
    "deepminer",
    "authedmine",
    "minemytraffic",
];

/// Ad networks checked against nodes added after page load.
pub const AD_NETWORK_PATTERNS: &[&str] = &[
    "doubleclick",
    "pagead",
    "googleads",
    "amazon-adsystem",
    "taboola",
    "outbrain",
];

// =============================================================================
// Inline Script Keywords
// =============================================================================

/// Keywords that mark an inline script as a probable miner. Case-sensitive.
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "cryptonight",
    "monero",
    "wasm_exec",
    "WebAssembly.instantiate",
    "cnHashing",
];

// =============================================================================
// Iframe / Image Signals
// =============================================================================

pub const IFRAME_URL_PATTERNS: &[&str] = &["doubleclick", "pagead", "googleads", "/ads/"];

pub const IFRAME_ID_TOKENS: &[&str] = &["ad", "google_ads"];

pub const IFRAME_CLASS_TOKENS: &[&str] = &["ad"];

pub const PIXEL_URL_PATTERNS: &[&str] = &["facebook", "track"];

pub const PIXEL_SIZE_MARKER: &str = "1x1";

/// Class token that flags a freshly inserted element as an ad container.
pub const AD_CLASS_TOKEN: &str = "ad";

// =============================================================================
// Structural Selectors
// =============================================================================

/// One structural ad-container signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum StructuralSelector {
    /// `[class*='…']`
    ClassContains(&'static str),
    /// `[id*='…']`
    IdContains(&'static str),
    /// `.…`
    HasClass(&'static str),
    /// `[…]`
    HasAttribute(&'static str),
    /// `tag.class`
    TagWithClass(&'static str, &'static str),
}

impl StructuralSelector {
    /// CSS form, for hosts with a native selector engine.
    pub fn to_css(&self) -> String {
        match self {
            Self::ClassContains(v) => format!("[class*='{v}']"),
            Self::IdContains(v) => format!("[id*='{v}']"),
            Self::HasClass(v) => format!(".{v}"),
            Self::HasAttribute(v) => format!("[{v}]"),
            Self::TagWithClass(tag, class) => format!("{tag}.{class}"),
        }
    }
}

/// Class/id naming conventions and explicit markers used by ad containers.
pub const STRUCTURAL_SELECTORS: &[StructuralSelector] = &[
    StructuralSelector::ClassContains("ad-"),
    StructuralSelector::ClassContains("-ad-"),
    StructuralSelector::ClassContains("_ad_"),
    StructuralSelector::IdContains("ad-"),
    StructuralSelector::IdContains("-ad-"),
    StructuralSelector::IdContains("_ad_"),
    StructuralSelector::ClassContains("banner"),
    StructuralSelector::IdContains("banner"),
    StructuralSelector::ClassContains("advert"),
    StructuralSelector::IdContains("advert"),
    StructuralSelector::HasClass("advertisement"),
    StructuralSelector::HasClass("advert"),
    StructuralSelector::HasClass("ads"),
    StructuralSelector::HasClass("ad-container"),
    StructuralSelector::HasClass("ad-slot"),
    StructuralSelector::HasClass("ad-unit"),
    StructuralSelector::HasAttribute("data-ad-slot"),
    StructuralSelector::HasAttribute("data-advertisement"),
    StructuralSelector::TagWithClass("ins", "adsbygoogle"),
];

/// The whole selector set as one CSS selector list.
pub fn structural_selector_list() -> String {
    STRUCTURAL_SELECTORS
        .iter()
        .map(StructuralSelector::to_css)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Page-Context Guard Targets
// =============================================================================

/// Domains whose requests the page-context guard refuses to issue.
pub const BLOCKED_DOMAINS: &[&str] = &[
    "doubleclick",
    "pagead",
    "googleads",
    "adsbygoogle",
    "facebook.com/tr",
    "analytics.google",
    "google-analytics",
    "segment.com",
    "mixpanel.com",
    "taboola.com",
    "outbrain.com",
    "amazon-adsystem.com",
    "googlesyndication.com",
    "googleadservices.com",
    "coinhive.com",
    "coin-hive.com",
    "crypto-loot.com",
    "jsecoin.com",
    "webminepool.com",
    "monerominer.rocks",
    "cryptaloot.pro",
    "deepminer.net",
    "authedmine.com",
    "minemytraffic.com",
];

/// Global names miner libraries register under or detection scripts poll.
pub const MINER_GLOBALS: &[&str] = &["CoinHive", "CRLT", "JSEcoin", "Miner", "EtherMiner", "Client"];

/// A tracking or analytics entry point replaced by a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryPoint {
    /// `window[global].push` on a push-based queue array, created if missing
    QueuePush { global: &'static str },
    /// A global function replaced by one that swallows its arguments
    Function { global: &'static str },
    /// A global array reset to empty
    EmptyQueue { global: &'static str },
    /// A global array created only if missing, left alone otherwise
    KeepQueue { global: &'static str },
    /// A global object whose listed methods are all no-ops
    Object {
        global: &'static str,
        methods: &'static [&'static str],
    },
}

impl EntryPoint {
    pub fn global(&self) -> &'static str {
        match self {
            Self::QueuePush { global }
            | Self::Function { global }
            | Self::EmptyQueue { global }
            | Self::KeepQueue { global }
            | Self::Object { global, .. } => global,
        }
    }
}

pub const TRACKING_ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::QueuePush { global: "adsbygoogle" },
    EntryPoint::Function { global: "ga" },
    EntryPoint::Function { global: "gtag" },
    EntryPoint::Function { global: "fbq" },
    EntryPoint::EmptyQueue { global: "_gaq" },
    EntryPoint::KeepQueue { global: "dataLayer" },
    EntryPoint::Object {
        global: "analytics",
        methods: &["track", "page", "identify"],
    },
];

// =============================================================================
// Inference Patterns (regex)
// =============================================================================

const AD_INFERENCE: &[&str] = &[r"ads?/", "advert", "banner", "pagead", "doubleclick"];

const TRACKER_INFERENCE: &[&str] = &[
    "analytics",
    "google-analytics",
    "gtag",
    "tracking",
    "facebook.*pixel",
    "segment",
    "mixpanel",
];

const MINER_INFERENCE: &[&str] = &[
    "coinhive",
    "crypto-loot",
    "jsecoin",
    "webminepool",
    "monerominer",
    "cryptaloot",
    "deepminer",
    "authedmine",
];

// =============================================================================
// Pattern
// =============================================================================

/// How a pattern matches its subject.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Lowercase substring, tested against a lowercased subject
    Substring(&'static str),
    /// Case-insensitive regular expression, tested against the raw subject
    Regex(Regex),
}

/// A category-tagged pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub category: Category,
    pub matcher: Matcher,
}

impl Pattern {
    pub fn substring(category: Category, needle: &'static str) -> Self {
        Self {
            category,
            matcher: Matcher::Substring(needle),
        }
    }

    pub fn regex(category: Category, source: &str) -> Result<Self, RuleError> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|e| RuleError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            category,
            matcher: Matcher::Regex(regex),
        })
    }

    /// `lower` must be `raw` lowercased.
    #[inline]
    pub fn is_match(&self, raw: &str, lower: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => lower.contains(needle),
            Matcher::Regex(regex) => regex.is_match(raw),
        }
    }
}

/// Error building a rule set.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// =============================================================================
// Rule Set
// =============================================================================

/// All patterns, grouped per category in classification order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    url: Vec<Pattern>,
    inference: Vec<Pattern>,
}

impl RuleSet {
    /// Build the built-in rule set.
    pub fn builtin() -> Result<Self, RuleError> {
        let mut url = Vec::new();
        for (category, needles) in [
            (Category::Ad, AD_URL_PATTERNS),
            (Category::Tracker, TRACKER_URL_PATTERNS),
            (Category::Miner, MINER_URL_PATTERNS),
        ] {
            url.extend(needles.iter().map(|needle| Pattern::substring(category, needle)));
        }

        let mut inference = Vec::new();
        for (category, sources) in [
            (Category::Ad, AD_INFERENCE),
            (Category::Tracker, TRACKER_INFERENCE),
            (Category::Miner, MINER_INFERENCE),
        ] {
            for source in sources {
                inference.push(Pattern::regex(category, source)?);
            }
        }

        Ok(Self { url, inference })
    }

    /// Patterns used to classify script URLs, in category order.
    pub fn url_patterns(&self) -> &[Pattern] {
        &self.url
    }

    /// Regex patterns used to infer a category for an unclassified report.
    pub fn inference_patterns(&self) -> &[Pattern] {
        &self.inference
    }

    pub fn len(&self) -> usize {
        self.url.len() + self.inference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Export
// =============================================================================

/// Serializable view of every built-in list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDump {
    pub ad_url_patterns: &'static [&'static str],
    pub tracker_url_patterns: &'static [&'static str],
    pub miner_url_patterns: &'static [&'static str],
    pub ad_network_patterns: &'static [&'static str],
    pub suspicious_keywords: &'static [&'static str],
    pub iframe_url_patterns: &'static [&'static str],
    pub iframe_id_tokens: &'static [&'static str],
    pub iframe_class_tokens: &'static [&'static str],
    pub pixel_url_patterns: &'static [&'static str],
    pub structural_selectors: &'static [StructuralSelector],
    pub blocked_domains: &'static [&'static str],
    pub miner_globals: &'static [&'static str],
    pub tracking_entry_points: &'static [EntryPoint],
}

impl RuleSetDump {
    pub fn builtin() -> Self {
        Self {
            ad_url_patterns: AD_URL_PATTERNS,
            tracker_url_patterns: TRACKER_URL_PATTERNS,
            miner_url_patterns: MINER_URL_PATTERNS,
            ad_network_patterns: AD_NETWORK_PATTERNS,
            suspicious_keywords: SUSPICIOUS_KEYWORDS,
            iframe_url_patterns: IFRAME_URL_PATTERNS,
            iframe_id_tokens: IFRAME_ID_TOKENS,
            iframe_class_tokens: IFRAME_CLASS_TOKENS,
            pixel_url_patterns: PIXEL_URL_PATTERNS,
            structural_selectors: STRUCTURAL_SELECTORS,
            blocked_domains: BLOCKED_DOMAINS,
            miner_globals: MINER_GLOBALS,
            tracking_entry_points: TRACKING_ENTRY_POINTS,
        }
    }
}
