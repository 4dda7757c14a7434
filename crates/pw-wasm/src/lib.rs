//! WebAssembly bindings for PageWarden
//!
//! Two entry points, one per realm:
//!
//! - [`start_content`] runs in the content script once the document is
//!   ready. It owns the page session, the mutation observer and the report
//!   channel to the background worker.
//! - [`install_page_guard`] runs in the page's own realm and patches the
//!   network APIs there. Loaded by the script the content side injects, it
//!   runs after any page script already parsed. To patch ahead of every page
//!   script, register the loader as a main-world `document_start` script and
//!   call [`start_content`] without a guard URL.

pub mod content;
pub mod dom;
pub mod guard;
pub mod sink;
pub mod timers;

use std::cell::RefCell;
use std::rc::Rc;

use pw_core::config::{ConfigError, PageConfig};
use pw_core::guard::{GuardError, GuardPolicy, PageGuard};
use pw_core::report::Recorder;
use pw_core::session::PageSession;
use pw_core::types::EngineOptions;
use pw_core::Classifier;
use wasm_bindgen::prelude::*;

use crate::content::ContentHandle;
use crate::guard::{BrowserRealm, SharedGuard};
use crate::sink::{RelaySink, RuntimeSink};

thread_local! {
    static INSTALLED_GUARD: RefCell<Option<SharedGuard>> = const { RefCell::new(None) };
}

fn to_js<E: std::fmt::Display>(e: E) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

fn window() -> Result<web_sys::Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("No window in this context"))
}

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
}

/// Parse the `{isEnabled, whitelist}` object read from extension storage.
fn config_from_js(config: &JsValue) -> Result<PageConfig, ConfigError> {
    if config.is_undefined() || config.is_null() {
        return Err(ConfigError::Unavailable("no stored config".to_string()));
    }
    let json = js_sys::JSON::stringify(config)
        .ok()
        .and_then(|s| s.as_string())
        .ok_or_else(|| ConfigError::Unavailable("config is not serialisable".to_string()))?;
    PageConfig::from_json(&json)
}

/// Start protection for the current page load.
///
/// `config` is the raw storage object; a missing or malformed one keeps
/// protection on. `guard_url` is the extension URL of the page-realm loader.
#[wasm_bindgen]
pub fn start_content(config: JsValue, guard_url: Option<String>) -> Result<ContentHandle, JsValue> {
    let window = window()?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("No document in this context"))?;
    let hostname = window.location().hostname().unwrap_or_default();

    let config = PageConfig::load_or_default(config_from_js(&config));
    let classifier = Classifier::builtin().map_err(to_js)?;
    let recorder = Recorder::new(RuntimeSink::new(), now_ms);
    let session = PageSession::new(hostname, &config, EngineOptions::default(), classifier, recorder);

    ContentHandle::start(window, document, session, guard_url)
}

/// Patch the page realm. Returns the install report; a second call fails.
///
/// Only calls made after this returns are guarded.
#[wasm_bindgen]
pub fn install_page_guard() -> Result<JsValue, JsValue> {
    let window = window()?;
    let classifier = Classifier::builtin().map_err(to_js)?;
    let recorder = Recorder::new(RelaySink::new(window.clone()), now_ms);
    let guard: SharedGuard =
        Rc::new(RefCell::new(PageGuard::new(GuardPolicy::new(classifier)).with_recorder(recorder)));

    let first = INSTALLED_GUARD.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Rc::clone(&guard));
        true
    });
    if !first {
        return Err(to_js(GuardError::AlreadyInstalled));
    }

    let mut realm = BrowserRealm::new(window, Rc::clone(&guard));
    let report = guard.borrow_mut().install(&mut realm).map_err(to_js)?;

    let json = serde_json::to_string(&report).map_err(to_js)?;
    js_sys::JSON::parse(&json)
}

/// `{delegated, blocked}` counters of the installed page guard.
#[wasm_bindgen]
pub fn guard_stats() -> Result<JsValue, JsValue> {
    let stats = INSTALLED_GUARD
        .with(|slot| {
            slot.borrow()
                .as_ref()
                .and_then(|guard| guard.try_borrow().ok().map(|guard| guard.stats()))
        })
        .ok_or_else(|| JsValue::from_str("Page guard is not installed"))?;
    let json = serde_json::to_string(&stats).map_err(to_js)?;
    js_sys::JSON::parse(&json)
}

/// Category of a URL (`"ad"`, `"tracker"`, `"miner"`), if any.
#[wasm_bindgen]
pub fn classify_url(url: &str) -> Result<Option<String>, JsValue> {
    let classifier = Classifier::builtin().map_err(to_js)?;
    Ok(classifier.classify(url).map(|c| c.as_str().to_string()))
}
