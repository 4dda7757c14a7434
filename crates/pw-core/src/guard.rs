//! Page-Context Guard
//!
//! The guard runs in the page's own realm, installed once before any page
//! script, and never removes its patches. It
//!
//! - replaces tracking entry points with no-ops,
//! - shadows miner globals with accessors that read as undefined,
//! - wraps `fetch`, `XMLHttpRequest.prototype.open`, `window.open` and the
//!   `WebSocket` constructor so blocked targets never reach the network.
//!
//! Each wrapped capability is recorded in a [`CapabilityRegistry`] together
//! with the original reference it delegates to. The realm-specific patching
//! is behind the [`Realm`] trait; all decisions are made here.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::classifier::Classifier;
use crate::report::Recorder;
use crate::rules::{EntryPoint, MINER_GLOBALS, TRACKING_ENTRY_POINTS};
use crate::types::Category;

// =============================================================================
// Capabilities and Calls
// =============================================================================

/// A network-reaching capability the guard wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Fetch,
    XhrOpen,
    WindowOpen,
    WebSocket,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Fetch,
        Capability::XhrOpen,
        Capability::WindowOpen,
        Capability::WebSocket,
    ];

    /// Property path in the page realm.
    pub fn path(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::XhrOpen => "XMLHttpRequest.prototype.open",
            Self::WindowOpen => "open",
            Self::WebSocket => "WebSocket",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// An intercepted call, reduced to what the decision needs. A `None` target
/// means the realm could not read one from the arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCall<'a> {
    Fetch { target: Option<&'a str> },
    XhrOpen { method: &'a str, target: Option<&'a str> },
    WindowOpen { target: Option<&'a str>, name: Option<&'a str> },
    WebSocket { target: Option<&'a str> },
}

impl<'a> NetworkCall<'a> {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Fetch { .. } => Capability::Fetch,
            Self::XhrOpen { .. } => Capability::XhrOpen,
            Self::WindowOpen { .. } => Capability::WindowOpen,
            Self::WebSocket { .. } => Capability::WebSocket,
        }
    }

    pub fn target(&self) -> Option<&'a str> {
        match *self {
            Self::Fetch { target }
            | Self::XhrOpen { target, .. }
            | Self::WindowOpen { target, .. }
            | Self::WebSocket { target } => target.filter(|t| !t.is_empty()),
        }
    }
}

/// Why a call was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockReason {
    BlockedDomain,
    /// `window.open` without a window name. A heuristic against unsolicited
    /// popups, which also catches some legitimate unnamed opens.
    UnnamedPopup,
}

/// What the caller of a blocked capability observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// `fetch`: a rejected promise
    Reject,
    /// `XMLHttpRequest`: status 0 and an empty body, no exception
    EmptyResponse,
    /// `window.open`: a null window handle
    NullWindow,
    /// `WebSocket`: a synchronous error from the constructor
    Throw,
}

impl Interception {
    pub fn for_capability(capability: Capability) -> Self {
        match capability {
            Capability::Fetch => Self::Reject,
            Capability::XhrOpen => Self::EmptyResponse,
            Capability::WindowOpen => Self::NullWindow,
            Capability::WebSocket => Self::Throw,
        }
    }
}

/// Outcome of routing a call through the guard.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch<'g, O> {
    /// Call the original unchanged.
    Delegate(&'g O),
    Blocked {
        reason: BlockReason,
        interception: Interception,
    },
}

// =============================================================================
// Policy
// =============================================================================

/// Pure blocking decisions.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    classifier: Classifier,
}

impl GuardPolicy {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// `None` means delegate.
    pub fn decide(&self, call: &NetworkCall<'_>) -> Option<BlockReason> {
        let target = call.target();

        if let Some(target) = target {
            if self.classifier.is_blocked_url(target) {
                return Some(BlockReason::BlockedDomain);
            }
        }

        if let NetworkCall::WindowOpen { name, .. } = call {
            let unnamed = name.map_or(true, str::is_empty);
            if target.is_some() && unnamed {
                return Some(BlockReason::UnnamedPopup);
            }
        }

        None
    }

    /// Category reported for a blocked-domain call.
    pub fn category_for(&self, target: &str) -> Category {
        self.classifier
            .classify(target)
            .or_else(|| self.classifier.infer_category(target))
            .unwrap_or(Category::Ad)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// A captured original and whether its wrapper is in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedCapability<O> {
    pub original: O,
    pub wrapped: bool,
}

/// Capability -> original reference, for every capability the guard wraps.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry<O> {
    entries: BTreeMap<Capability, GuardedCapability<O>>,
}

impl<O> Default for CapabilityRegistry<O> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<O> CapabilityRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the original for `capability`. A capability is captured once.
    pub fn capture(&mut self, capability: Capability, original: O) -> Result<(), GuardError> {
        if self.entries.contains_key(&capability) {
            return Err(GuardError::AlreadyCaptured(capability));
        }
        self.entries.insert(
            capability,
            GuardedCapability {
                original,
                wrapped: false,
            },
        );
        Ok(())
    }

    fn mark_wrapped(&mut self, capability: Capability) {
        if let Some(entry) = self.entries.get_mut(&capability) {
            entry.wrapped = true;
        }
    }

    pub fn original(&self, capability: Capability) -> Option<&O> {
        self.entries.get(&capability).map(|entry| &entry.original)
    }

    pub fn is_wrapped(&self, capability: Capability) -> bool {
        self.entries.get(&capability).is_some_and(|entry| entry.wrapped)
    }

    pub fn wrapped(&self) -> impl Iterator<Item = Capability> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.wrapped)
            .map(|(capability, _)| *capability)
    }
}

// =============================================================================
// Realm
// =============================================================================

/// Failures while patching the page realm.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Page guard is already installed")]
    AlreadyInstalled,
    #[error("{0} was already captured")]
    AlreadyCaptured(Capability),
    #[error("{0} is not available in this realm")]
    Missing(String),
    #[error("Failed to patch {target}: {reason}")]
    Patch { target: String, reason: String },
}

/// The page realm's global object, as seen by the guard.
pub trait Realm {
    /// Unpatched function reference.
    type Original;

    /// Replace a tracking entry point with a no-op stand-in.
    fn neutralize(&mut self, entry: &EntryPoint) -> Result<(), GuardError>;

    /// Define an accessor that reads as undefined and discards writes.
    fn shadow_global(&mut self, name: &str) -> Result<(), GuardError>;

    /// Read the current implementation of `capability`.
    fn capture(&mut self, capability: Capability) -> Result<Self::Original, GuardError>;

    /// Put the decorating wrapper for `capability` in place. The wrapper
    /// routes every call through [`PageGuard::dispatch`].
    fn wrap(&mut self, capability: Capability) -> Result<(), GuardError>;
}

// =============================================================================
// Page Guard
// =============================================================================

/// What an install pass managed to patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub neutralized: Vec<&'static str>,
    pub shadowed: Vec<&'static str>,
    pub wrapped: Vec<Capability>,
    pub failures: Vec<String>,
}

/// Counters for intercepted calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStats {
    pub delegated: u32,
    pub blocked: u32,
}

/// Installs the patches and routes every wrapped call.
pub struct PageGuard<O> {
    policy: GuardPolicy,
    registry: CapabilityRegistry<O>,
    recorder: Option<Recorder>,
    installed: bool,
    stats: GuardStats,
}

impl<O: fmt::Debug> fmt::Debug for PageGuard<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("registry", &self.registry)
            .field("installed", &self.installed)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<O> PageGuard<O> {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            policy,
            registry: CapabilityRegistry::new(),
            recorder: None,
            installed: false,
            stats: GuardStats::default(),
        }
    }

    /// Forward blocked-domain calls to a recorder.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &CapabilityRegistry<O> {
        &self.registry
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn stats(&self) -> GuardStats {
        self.stats
    }

    /// Patch the realm. Individual patch failures are logged and collected;
    /// the rest of the install still runs. A second call fails.
    pub fn install<R>(&mut self, realm: &mut R) -> Result<InstallReport, GuardError>
    where
        R: Realm<Original = O>,
    {
        if self.installed {
            return Err(GuardError::AlreadyInstalled);
        }
        self.installed = true;

        let mut report = InstallReport::default();

        for entry in TRACKING_ENTRY_POINTS {
            match realm.neutralize(entry) {
                Ok(()) => report.neutralized.push(entry.global()),
                Err(e) => report.failures.push(e.to_string()),
            }
        }

        for name in MINER_GLOBALS {
            match realm.shadow_global(name) {
                Ok(()) => report.shadowed.push(*name),
                Err(e) => report.failures.push(e.to_string()),
            }
        }

        for capability in Capability::ALL {
            match self.wrap_capability(realm, capability) {
                Ok(()) => report.wrapped.push(capability),
                Err(e) => report.failures.push(e.to_string()),
            }
        }

        for failure in &report.failures {
            log::warn!("Page guard: {}", failure);
        }
        log::info!(
            "Page guard installed: {} entry points, {} miner globals, {} capabilities",
            report.neutralized.len(),
            report.shadowed.len(),
            report.wrapped.len()
        );
        Ok(report)
    }

    fn wrap_capability<R>(&mut self, realm: &mut R, capability: Capability) -> Result<(), GuardError>
    where
        R: Realm<Original = O>,
    {
        let original = realm.capture(capability)?;
        self.registry.capture(capability, original)?;
        realm.wrap(capability)?;
        self.registry.mark_wrapped(capability);
        Ok(())
    }

    /// Route one call. Calls with no readable target, or on a capability
    /// whose original was never captured, are not blocked.
    pub fn dispatch(&mut self, call: &NetworkCall<'_>) -> Result<Dispatch<'_, O>, GuardError> {
        let capability = call.capability();

        if let Some(reason) = self.policy.decide(call) {
            self.stats.blocked += 1;
            let target = call.target().unwrap_or_default();
            log::debug!("Blocked {} to {} ({:?})", capability, target, reason);

            if reason == BlockReason::BlockedDomain {
                let category = self.policy.category_for(target);
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.suppressed(target, category);
                }
            }
            return Ok(Dispatch::Blocked {
                reason,
                interception: Interception::for_capability(capability),
            });
        }

        self.stats.delegated += 1;
        self.registry
            .original(capability)
            .map(Dispatch::Delegate)
            .ok_or_else(|| GuardError::Missing(capability.path().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    use crate::report::MemorySink;

    /// Unpatched-function double that counts real calls.
    #[derive(Debug, Default)]
    struct Original {
        calls: Cell<u32>,
    }

    impl Original {
        fn call(&self) -> &'static str {
            self.calls.set(self.calls.get() + 1);
            "network"
        }
    }

    #[derive(Default)]
    struct MemoryRealm {
        originals: HashMap<Capability, Rc<Original>>,
        wrapped: HashSet<Capability>,
        neutralized: Vec<&'static str>,
        shadowed: Vec<String>,
        frozen: HashSet<&'static str>,
    }

    impl MemoryRealm {
        fn browser() -> Self {
            let mut realm = Self::default();
            for capability in Capability::ALL {
                realm.originals.insert(capability, Rc::new(Original::default()));
            }
            realm
        }
    }

    impl Realm for MemoryRealm {
        type Original = Rc<Original>;

        fn neutralize(&mut self, entry: &EntryPoint) -> Result<(), GuardError> {
            if self.frozen.contains(entry.global()) {
                return Err(GuardError::Patch {
                    target: entry.global().to_string(),
                    reason: "property is not writable".to_string(),
                });
            }
            self.neutralized.push(entry.global());
            Ok(())
        }

        fn shadow_global(&mut self, name: &str) -> Result<(), GuardError> {
            self.shadowed.push(name.to_string());
            Ok(())
        }

        fn capture(&mut self, capability: Capability) -> Result<Rc<Original>, GuardError> {
            self.originals
                .get(&capability)
                .cloned()
                .ok_or_else(|| GuardError::Missing(capability.path().to_string()))
        }

        fn wrap(&mut self, capability: Capability) -> Result<(), GuardError> {
            self.wrapped.insert(capability);
            Ok(())
        }
    }

    fn guard() -> PageGuard<Rc<Original>> {
        PageGuard::new(GuardPolicy::new(Classifier::builtin().unwrap()))
    }

    /// What the wrapper in the realm does with a dispatch.
    fn invoke(guard: &mut PageGuard<Rc<Original>>, call: NetworkCall<'_>) -> Result<&'static str, Interception> {
        match guard.dispatch(&call).unwrap() {
            Dispatch::Delegate(original) => Ok(original.call()),
            Dispatch::Blocked { interception, .. } => Err(interception),
        }
    }

    #[test]
    fn test_install_patches_everything_once() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();

        let report = guard.install(&mut realm).unwrap();
        assert_eq!(report.wrapped, Capability::ALL.to_vec());
        assert_eq!(report.shadowed, MINER_GLOBALS.to_vec());
        assert_eq!(report.neutralized.len(), TRACKING_ENTRY_POINTS.len());
        assert!(report.failures.is_empty());
        for capability in Capability::ALL {
            assert!(guard.registry().is_wrapped(capability));
            assert!(realm.wrapped.contains(&capability));
        }

        assert_eq!(guard.install(&mut realm), Err(GuardError::AlreadyInstalled));
    }

    #[test]
    fn test_install_continues_past_failures() {
        let mut realm = MemoryRealm::browser();
        realm.frozen.insert("gtag");
        realm.originals.remove(&Capability::WebSocket);
        let mut guard = guard();

        let report = guard.install(&mut realm).unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(!report.neutralized.contains(&"gtag"));
        assert!(report.neutralized.contains(&"fbq"));
        assert_eq!(report.wrapped.len(), 3);
        assert!(!guard.registry().is_wrapped(Capability::WebSocket));
    }

    #[test]
    fn test_fetch_blocked_domain_never_reaches_network() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();
        guard.install(&mut realm).unwrap();
        let fetch = realm.originals[&Capability::Fetch].clone();

        let blocked = invoke(
            &mut guard,
            NetworkCall::Fetch {
                target: Some("https://pagead2.googlesyndication.com/x"),
            },
        );
        assert_eq!(blocked, Err(Interception::Reject));
        assert_eq!(fetch.calls.get(), 0);

        let passed = invoke(
            &mut guard,
            NetworkCall::Fetch {
                target: Some("https://example.com/data.json"),
            },
        );
        assert_eq!(passed, Ok("network"));
        assert_eq!(fetch.calls.get(), 1);
        assert_eq!(guard.stats(), GuardStats { delegated: 1, blocked: 1 });
    }

    #[test]
    fn test_xhr_blocked_yields_empty_response() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();
        guard.install(&mut realm).unwrap();

        let call = NetworkCall::XhrOpen {
            method: "POST",
            target: Some("https://api.mixpanel.com/track"),
        };
        assert_eq!(invoke(&mut guard, call), Err(Interception::EmptyResponse));
        assert_eq!(realm.originals[&Capability::XhrOpen].calls.get(), 0);
    }

    #[test]
    fn test_window_open_heuristics() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();
        guard.install(&mut realm).unwrap();

        let ad = NetworkCall::WindowOpen {
            target: Some("https://googleads.g.doubleclick.net/click"),
            name: Some("promo"),
        };
        let unnamed = NetworkCall::WindowOpen {
            target: Some("https://example.com/deal"),
            name: None,
        };
        let named = NetworkCall::WindowOpen {
            target: Some("https://example.com/help"),
            name: Some("help"),
        };
        let blank = NetworkCall::WindowOpen { target: None, name: None };

        assert_eq!(guard.policy().decide(&ad), Some(BlockReason::BlockedDomain));
        assert_eq!(guard.policy().decide(&unnamed), Some(BlockReason::UnnamedPopup));
        assert_eq!(invoke(&mut guard, unnamed), Err(Interception::NullWindow));
        assert_eq!(invoke(&mut guard, named), Ok("network"));
        assert_eq!(invoke(&mut guard, blank), Ok("network"));
    }

    #[test]
    fn test_websocket_blocked_throws() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();
        guard.install(&mut realm).unwrap();

        let miner = NetworkCall::WebSocket {
            target: Some("wss://ws.coinhive.com/proxy"),
        };
        let chat = NetworkCall::WebSocket {
            target: Some("wss://chat.example.com/socket"),
        };
        assert_eq!(invoke(&mut guard, miner), Err(Interception::Throw));
        assert_eq!(invoke(&mut guard, chat), Ok("network"));
    }

    #[test]
    fn test_unreadable_target_delegates() {
        let mut realm = MemoryRealm::browser();
        let mut guard = guard();
        guard.install(&mut realm).unwrap();

        assert_eq!(invoke(&mut guard, NetworkCall::Fetch { target: None }), Ok("network"));
        assert_eq!(invoke(&mut guard, NetworkCall::Fetch { target: Some("") }), Ok("network"));
    }

    #[test]
    fn test_dispatch_without_capture_is_an_error() {
        let mut guard = guard();
        let call = NetworkCall::Fetch {
            target: Some("https://example.com/"),
        };
        assert!(matches!(guard.dispatch(&call), Err(GuardError::Missing(_))));
    }

    #[test]
    fn test_blocked_domains_are_reported() {
        let sink = MemorySink::new();
        let mut realm = MemoryRealm::browser();
        let mut guard = guard().with_recorder(Recorder::new(sink.clone(), || 7));
        guard.install(&mut realm).unwrap();

        invoke(
            &mut guard,
            NetworkCall::WebSocket {
                target: Some("wss://ws.coinhive.com/proxy"),
            },
        )
        .unwrap_err();
        invoke(
            &mut guard,
            NetworkCall::WindowOpen {
                target: Some("https://example.com/deal"),
                name: None,
            },
        )
        .unwrap_err();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, Category::Miner);
        assert_eq!(events[0].timestamp, 7);
    }

    #[test]
    fn test_registry_capture_once() {
        let mut registry = CapabilityRegistry::new();
        registry.capture(Capability::Fetch, 1).unwrap();
        assert_eq!(
            registry.capture(Capability::Fetch, 2),
            Err(GuardError::AlreadyCaptured(Capability::Fetch))
        );
        assert_eq!(registry.original(Capability::Fetch), Some(&1));
        assert!(!registry.is_wrapped(Capability::Fetch));
    }
}
