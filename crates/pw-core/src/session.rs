//! Per-page-load session
//!
//! A [`PageSession`] owns everything one page load needs: the config read at
//! start, the classifier, the recorder with its seen-hosts set, and the
//! mutation watcher. Nothing is shared between page loads.

use serde::Serialize;

use crate::classifier::Classifier;
use crate::config::PageConfig;
use crate::dom::Dom;
use crate::guard::GuardError;
use crate::report::{ActionCounts, Recorder};
use crate::scanner::PageScanner;
use crate::types::{Category, EngineOptions, ScanReport, ScanSteps};
use crate::watcher::{FireOutcome, MutationWatcher, Timers};

/// Whether the core runs on this page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Active,
    /// Protection switched off in config.
    Disabled,
    /// The hostname contains this whitelist entry.
    Whitelisted(String),
}

impl Activation {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Puts the page guard into the page realm.
pub trait GuardInjector {
    fn inject(&mut self) -> Result<(), GuardError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session was torn down")]
    TornDown,
}

/// Snapshot of one page load, exposed to the binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active: bool,
    pub counts: ActionCounts,
    pub rescans: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    TornDown,
}

#[derive(Debug)]
pub struct PageSession<N, H> {
    hostname: String,
    activation: Activation,
    options: EngineOptions,
    classifier: Classifier,
    recorder: Recorder,
    watcher: Option<MutationWatcher<N, H>>,
    phase: Phase,
}

impl<N, H> PageSession<N, H> {
    pub fn new(
        hostname: impl Into<String>,
        config: &PageConfig,
        options: EngineOptions,
        classifier: Classifier,
        recorder: Recorder,
    ) -> Self {
        let hostname = hostname.into();
        let activation = if !config.enabled {
            Activation::Disabled
        } else if let Some(entry) = config.whitelist_entry_for(&hostname) {
            Activation::Whitelisted(entry.to_string())
        } else {
            Activation::Active
        };

        Self {
            hostname,
            activation,
            options,
            classifier,
            recorder,
            watcher: None,
            phase: Phase::Created,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Whether a watcher is armed and not yet torn down.
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_disconnected())
    }

    /// Inject the guard, run the full scan and arm the watcher. An inert
    /// session does none of these and returns `Ok(None)`.
    ///
    /// The injector runs before the scan. It cannot run before page scripts
    /// already parsed; hosts that need the guard ahead of every page script
    /// load it in the page realm at document start and pass an injector that
    /// only confirms it. A failed injection is logged; the DOM side still runs.
    pub fn start<D, G>(&mut self, dom: &mut D, injector: &mut G) -> Result<Option<ScanReport>, SessionError>
    where
        D: Dom<Node = N>,
        G: GuardInjector + ?Sized,
    {
        match self.phase {
            Phase::Created => {}
            Phase::Running => return Err(SessionError::AlreadyStarted),
            Phase::TornDown => return Err(SessionError::TornDown),
        }
        self.phase = Phase::Running;

        match &self.activation {
            Activation::Active => {}
            Activation::Disabled => {
                log::info!("Protection disabled, leaving {} alone", self.hostname);
                return Ok(None);
            }
            Activation::Whitelisted(entry) => {
                log::info!("{} is whitelisted by '{}', leaving it alone", self.hostname, entry);
                return Ok(None);
            }
        }

        if let Err(e) = injector.inject() {
            log::warn!("Could not inject page guard: {}", e);
        }

        let scanner = PageScanner::new(&self.classifier, self.options);
        let report = scanner.scan(dom, ScanSteps::ALL, &mut self.recorder);

        self.watcher = Some(MutationWatcher::new(self.options.debounce_ms));
        log::info!("Session active on {}, watcher armed", self.hostname);
        Ok(Some(report))
    }

    /// A mutation batch arrived.
    pub fn on_mutations<D, T>(&mut self, added: Vec<N>, dom: &D, timers: &mut T)
    where
        D: Dom<Node = N>,
        T: Timers<Handle = H>,
    {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.observe(added, dom, timers);
        }
    }

    /// The debounce timer elapsed.
    pub fn on_timer<D>(&mut self, dom: &mut D) -> Option<FireOutcome>
    where
        D: Dom<Node = N>,
    {
        let watcher = self.watcher.as_mut()?;
        let scanner = PageScanner::new(&self.classifier, self.options);
        watcher.fire(dom, &scanner, &mut self.recorder)
    }

    /// A suppression reported from the page realm. `category` falls back to
    /// inference when the guard did not classify it.
    ///
    /// The relay channel is open to any page script, so identifiers that are
    /// not on the blocked-domain list are dropped.
    pub fn relay(&mut self, identifier: &str, category: Option<Category>) {
        if !self.activation.is_active() || self.phase == Phase::TornDown {
            return;
        }
        if !self.classifier.is_blocked_url(identifier) {
            log::debug!("Ignoring relayed report for unlisted '{}'", identifier);
            return;
        }
        let category = category
            .or_else(|| self.classifier.infer_category(identifier))
            .unwrap_or(Category::Ad);
        self.recorder.suppressed(identifier, category);
    }

    /// Disconnect the watcher before navigation or reload. Idempotent.
    pub fn teardown<T>(&mut self, timers: &mut T)
    where
        T: Timers<Handle = H>,
    {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.disconnect(timers);
        }
        if self.phase != Phase::TornDown {
            log::info!("Session on {} torn down", self.hostname);
            self.phase = Phase::TornDown;
        }
    }

    pub fn counts(&self) -> ActionCounts {
        self.recorder.counts()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.activation.is_active(),
            counts: self.recorder.counts(),
            rescans: self.watcher.as_ref().map_or(0, MutationWatcher::rescans),
        }
    }
}
