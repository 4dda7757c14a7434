//! PageWarden Core Library
//!
//! Classification and suppression engine for the PageWarden content filter.
//! Everything here is host-independent: the DOM, timers, the page realm and
//! the report transport are traits, implemented over `web_sys` by `pw-wasm`
//! and in memory for tests and the CLI.
//!
//! # Architecture
//!
//! One [`PageSession`] exists per page load. It runs a single full scan at
//! document ready, arms a debounced [`MutationWatcher`] for content injected
//! later, and asks the host to inject the [`PageGuard`] into the page realm,
//! where it wraps `fetch`, `XMLHttpRequest`, `window.open` and `WebSocket`.
//! Every suppression flows through a [`Recorder`] to a [`ReportSink`].
//!
//! # Modules
//!
//! - `rules`: built-in pattern lists and the compiled [`RuleSet`]
//! - `classifier`: pure classification of URLs, inline scripts and elements
//! - `dom`: the [`Dom`] abstraction and the in-memory [`MemoryDom`]
//! - `scanner`: the one-shot page scan
//! - `watcher`: the debounced mutation watcher
//! - `guard`: page-context interception policy and capability registry
//! - `report`: suppression reporting and per-page counters
//! - `config`: per-page configuration
//! - `session`: the per-page-load session
//! - `url`: host extraction
//! - `types`: shared type definitions

pub mod classifier;
pub mod config;
pub mod dom;
pub mod guard;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod session;
pub mod types;
pub mod url;
pub mod watcher;

// Re-export commonly used types
pub use classifier::Classifier;
pub use config::{ConfigError, PageConfig};
pub use dom::{Dom, DomError, HideStyle, MemoryDom, MemoryElement, NodeId, PageFixture, Query};
pub use guard::{
    Capability, CapabilityRegistry, Dispatch, GuardError, GuardPolicy, Interception, NetworkCall,
    PageGuard, Realm,
};
pub use report::{ActionCounts, BlockMessage, MemorySink, Recorder, ReportError, ReportSink, SeenHosts};
pub use rules::{RuleError, RuleSet};
pub use scanner::PageScanner;
pub use session::{Activation, GuardInjector, PageSession, SessionError, SessionStats};
pub use types::{Category, EngineOptions, ScanReport, ScanSteps, SuppressionEvent};
pub use watcher::{FireOutcome, ManualTimers, MutationWatcher, TimerId, Timers};
