//! Dry-run scans over JSON page fixtures.

use std::fs;
use std::path::Path;

use pw_core::guard::GuardError;
use pw_core::url::extract_host;
use pw_core::{
    ActionCounts, Activation, Classifier, EngineOptions, GuardInjector, MemoryDom, MemorySink, NodeId,
    PageConfig, PageFixture, PageSession, Recorder, ScanReport, SuppressionEvent, TimerId,
};
use serde::Serialize;

/// A fixture has no page realm to patch.
struct FixtureInjector;

impl GuardInjector for FixtureInjector {
    fn inject(&mut self) -> Result<(), GuardError> {
        log::debug!("Fixture scan: no page realm, guard injection skipped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub hostname: String,
    pub activation: String,
    pub report: Option<ScanReport>,
    pub events: Vec<SuppressionEvent>,
    pub counts: ActionCounts,
    pub remaining: usize,
}

pub fn read_fixture(path: &Path) -> Result<PageFixture, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid fixture '{}': {}", path.display(), e))
}

/// Storage-shaped config file, or the defaults when none is given.
pub fn read_config(path: Option<&Path>) -> PageConfig {
    let Some(path) = path else {
        return PageConfig::default();
    };
    let result = fs::read_to_string(path)
        .map_err(|e| pw_core::ConfigError::Unavailable(format!("{}: {}", path.display(), e)))
        .and_then(|text| PageConfig::from_json(&text));
    PageConfig::load_or_default(result)
}

/// Run one page load against the fixture: session start, initial scan and
/// nothing else. `hostname` overrides the fixture URL's host.
pub fn scan_fixture(
    fixture: PageFixture,
    config: &PageConfig,
    hostname: Option<&str>,
) -> Result<ScanOutcome, String> {
    let hostname = hostname
        .map(str::to_string)
        .or_else(|| fixture.url.as_deref().and_then(extract_host).map(str::to_string))
        .unwrap_or_default();

    let classifier = Classifier::builtin().map_err(|e| format!("Failed to build rules: {}", e))?;
    let sink = MemorySink::new();
    let recorder = Recorder::new(sink.clone(), || 0);
    let mut session: PageSession<NodeId, TimerId> =
        PageSession::new(hostname.clone(), config, EngineOptions::default(), classifier, recorder);

    let mut dom = MemoryDom::from_fixture(fixture);
    let report = session
        .start(&mut dom, &mut FixtureInjector)
        .map_err(|e| e.to_string())?;

    let activation = match session.activation() {
        Activation::Active => "active".to_string(),
        Activation::Disabled => "disabled".to_string(),
        Activation::Whitelisted(entry) => format!("whitelisted ({})", entry),
    };

    Ok(ScanOutcome {
        hostname,
        activation,
        report,
        events: sink.events(),
        counts: session.counts(),
        remaining: dom.attached_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "url": "https://shop.example.com/cart",
        "elements": [
            {"tag": "script", "src": "https://www.googletagmanager.com/gtag/js?id=G-1"},
            {"tag": "script", "text": "var miner = cryptonight.hash(input);"},
            {"tag": "div", "class": "ad-container", "width": 300, "height": 250},
            {"tag": "img", "src": "https://www.facebook.com/tr?id=1&ev=PageView", "width": 1, "height": 1},
            {"tag": "p", "text": "Checkout"}
        ]
    }"#;

    #[test]
    fn test_scan_fixture() {
        let fixture: PageFixture = serde_json::from_str(FIXTURE).unwrap();
        let outcome = scan_fixture(fixture, &PageConfig::default(), None).unwrap();

        assert_eq!(outcome.hostname, "shop.example.com");
        assert_eq!(outcome.activation, "active");
        let report = outcome.report.unwrap();
        assert_eq!(report.scripts, 1);
        assert_eq!(report.inline_scripts, 1);
        assert_eq!(report.structural, 1);
        assert_eq!(report.images, 1);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.remaining, 3);
    }

    #[test]
    fn test_whitelisted_fixture_is_untouched() {
        let fixture: PageFixture = serde_json::from_str(FIXTURE).unwrap();
        let config = PageConfig::from_json(r#"{"whitelist": ["example.com"]}"#).unwrap();
        let outcome = scan_fixture(fixture, &config, None).unwrap();

        assert_eq!(outcome.activation, "whitelisted (example.com)");
        assert!(outcome.report.is_none());
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.remaining, 5);
    }

    #[test]
    fn test_hostname_override() {
        let fixture: PageFixture = serde_json::from_str(FIXTURE).unwrap();
        let config = PageConfig::from_json(r#"{"whitelist": ["example.com"]}"#).unwrap();
        let outcome = scan_fixture(fixture, &config, Some("news.example.org")).unwrap();
        assert_eq!(outcome.activation, "active");
    }
}
