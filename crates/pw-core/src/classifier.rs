//! Classifier
//!
//! Pure functions from a URL, script text or element signals to a verdict.
//! Nothing here touches the DOM or the network, and nothing here fails:
//! input that cannot be interpreted simply does not match.

use crate::rules::{
    RuleError, RuleSet, AD_CLASS_TOKEN, AD_NETWORK_PATTERNS, BLOCKED_DOMAINS,
    IFRAME_CLASS_TOKENS, IFRAME_ID_TOKENS, IFRAME_URL_PATTERNS, PIXEL_SIZE_MARKER,
    PIXEL_URL_PATTERNS, SUSPICIOUS_KEYWORDS,
};
use crate::types::Category;

#[inline]
fn contains_any(lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| lower.contains(needle))
}

/// Classifies resources against a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleSet,
}

impl Classifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Classifier over the built-in rule set.
    pub fn builtin() -> Result<Self, RuleError> {
        Ok(Self::new(RuleSet::builtin()?))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify a resource URL. Categories are tried in the order
    /// ad, tracker, miner and the first match wins.
    pub fn classify(&self, url: &str) -> Option<Category> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let lower = url.to_lowercase();
        self.rules
            .url_patterns()
            .iter()
            .find(|pattern| pattern.is_match(url, &lower))
            .map(|pattern| pattern.category)
    }

    /// Coarse miner heuristic for inline script bodies. False positives only
    /// cost the current page one inline script.
    pub fn classify_inline_content(&self, text: &str) -> bool {
        SUSPICIOUS_KEYWORDS.iter().any(|keyword| text.contains(keyword))
    }

    /// Narrow ad-network check applied to nodes added after page load.
    pub fn is_ad_script(&self, url: &str) -> bool {
        contains_any(&url.to_lowercase(), AD_NETWORK_PATTERNS)
    }

    /// An iframe is an ad when its URL matches or its id/class carries an
    /// ad-indicative token.
    pub fn classify_iframe(&self, src: &str, id: &str, class_name: &str) -> bool {
        contains_any(&src.to_lowercase(), IFRAME_URL_PATTERNS)
            || contains_any(&id.to_lowercase(), IFRAME_ID_TOKENS)
            || contains_any(&class_name.to_lowercase(), IFRAME_CLASS_TOKENS)
    }

    /// Tracking-indicative URL on a 1x1 (or one-pixel-wide/high) image.
    pub fn is_tracking_pixel(&self, src: &str, width: u32, height: u32) -> bool {
        let lower = src.to_lowercase();
        contains_any(&lower, PIXEL_URL_PATTERNS)
            && (lower.contains(PIXEL_SIZE_MARKER) || width == 1 || height == 1)
    }

    /// Whether any class in the list flags the element as an ad container.
    pub fn has_ad_class<'a, I>(&self, classes: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        classes
            .into_iter()
            .any(|class| class.to_lowercase().contains(AD_CLASS_TOKEN))
    }

    /// Blocked-domain check used by the page-context guard.
    pub fn is_blocked_url(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        contains_any(&url.to_lowercase(), BLOCKED_DOMAINS)
    }

    /// Best-effort category for a report whose sender did not classify it,
    /// using the regex inference patterns.
    pub fn infer_category(&self, url: &str) -> Option<Category> {
        self.rules
            .inference_patterns()
            .iter()
            .find(|pattern| pattern.is_match(url, ""))
            .map(|pattern| pattern.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::builtin().unwrap()
    }

    #[test]
    fn test_classify_miner() {
        let c = classifier();
        assert_eq!(c.classify("coinhive.com/lib.js"), Some(Category::Miner));
        assert_eq!(c.classify("https://coinhive.com/lib/coinhive.min.js"), Some(Category::Miner));
        assert_eq!(c.classify("https://cdn.CRYPTO-LOOT.com/x.js"), Some(Category::Miner));
        assert_eq!(c.classify("https://minemytraffic.com/m.js"), Some(Category::Miner));
    }

    #[test]
    fn test_classify_tracker() {
        let c = classifier();
        assert_eq!(
            c.classify("https://www.google-analytics.com/google-analytics/collect"),
            Some(Category::Tracker)
        );
        assert_eq!(c.classify("https://www.googletagmanager.com/gtag/js?id=G-1"), Some(Category::Tracker));
        assert_eq!(c.classify("https://cdn.segment.com/analytics.js"), Some(Category::Tracker));
    }

    #[test]
    fn test_classify_ad() {
        let c = classifier();
        assert_eq!(
            c.classify("https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js"),
            Some(Category::Ad)
        );
        assert_eq!(c.classify("https://example.com/static/ads.js"), Some(Category::Ad));
        assert_eq!(c.classify("https://cdn.taboola.com/libtrc/loader.js"), Some(Category::Ad));
    }

    #[test]
    fn test_classify_ad_wins_over_tracker() {
        // Matches both "doubleclick" and "tracking"
        let c = classifier();
        assert_eq!(c.classify("https://ad.doubleclick.net/tracking.js"), Some(Category::Ad));
    }

    #[test]
    fn test_classify_clean() {
        let c = classifier();
        assert_eq!(c.classify("https://example.com/data.json"), None);
        assert_eq!(c.classify("https://cdn.jsdelivr.net/npm/react.js"), None);
        assert_eq!(c.classify(""), None);
        assert_eq!(c.classify("   "), None);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let c = classifier();
        let url = "https://coinhive.com/lib.js";
        assert_eq!(c.classify(url), c.classify(url));
    }

    #[test]
    fn test_inline_content() {
        let c = classifier();
        assert!(c.classify_inline_content("var m = new CoinHive.Anonymous(k); cryptonight_hash();"));
        assert!(c.classify_inline_content("WebAssembly.instantiate(bytes)"));
        assert!(!c.classify_inline_content("console.log('hello')"));
        // Keywords are case-sensitive
        assert!(!c.classify_inline_content("webassembly.INSTANTIATE"));
    }

    #[test]
    fn test_is_ad_script() {
        let c = classifier();
        assert!(c.is_ad_script("https://securepubads.g.doubleclick.net/tag/js/gpt.js"));
        assert!(c.is_ad_script("https://c.amazon-adsystem.com/aax2/apstag.js"));
        // Generic ad paths are only caught by the full scan
        assert!(!c.is_ad_script("https://example.com/ads/loader.js"));
    }

    #[test]
    fn test_classify_iframe() {
        let c = classifier();
        assert!(c.classify_iframe("https://googleads.g.doubleclick.net/x", "", ""));
        assert!(c.classify_iframe("", "google_ads_iframe_1", ""));
        assert!(c.classify_iframe("", "", "sidebar-ad"));
        assert!(!c.classify_iframe("https://www.youtube.com/embed/x", "player", "video"));
    }

    #[test]
    fn test_tracking_pixel() {
        let c = classifier();
        assert!(c.is_tracking_pixel("https://www.facebook.com/tr?id=1", 1, 1));
        assert!(c.is_tracking_pixel("https://example.com/track/1x1.gif", 0, 0));
        assert!(!c.is_tracking_pixel("https://www.facebook.com/logo.png", 64, 64));
        assert!(!c.is_tracking_pixel("https://example.com/spacer.gif", 1, 1));
    }

    #[test]
    fn test_has_ad_class() {
        let c = classifier();
        assert!(c.has_ad_class(["card", "AdSlot"]));
        assert!(!c.has_ad_class(["card", "title"]));
    }

    #[test]
    fn test_is_blocked_url() {
        let c = classifier();
        assert!(c.is_blocked_url("https://pagead2.googlesyndication.com/x"));
        assert!(c.is_blocked_url("wss://WS.COINHIVE.COM/proxy"));
        assert!(!c.is_blocked_url("https://example.com/data.json"));
        assert!(!c.is_blocked_url(""));
    }

    #[test]
    fn test_infer_category() {
        let c = classifier();
        assert_eq!(c.infer_category("https://example.com/ad/banner.png"), Some(Category::Ad));
        assert_eq!(c.infer_category("https://example.com/Analytics/hit"), Some(Category::Tracker));
        assert_eq!(c.infer_category("https://authedmine.com/lib/x.js"), Some(Category::Miner));
        assert_eq!(c.infer_category("https://example.com/index.html"), None);
    }
}
