//! Content-script side of one page load.
//!
//! All per-page state sits in one `Rc<RefCell<ContentState>>` owned by the
//! [`ContentHandle`] returned to the extension glue. Browser callbacks hold
//! weak references, so dropping the handle after `teardown` frees the page.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use js_sys::Array;
use pw_core::guard::GuardError;
use pw_core::session::{GuardInjector, PageSession};
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, HtmlScriptElement, MessageEvent, MutationObserver, MutationObserverInit, MutationRecord, Window};

use crate::dom::{describe, WebDom};
use crate::sink::parse_relay;
use crate::timers::BrowserTimers;

pub type ContentSession = PageSession<Element, Option<i32>>;

struct ContentState {
    session: ContentSession,
    dom: WebDom,
    timers: BrowserTimers,
}

type MutationCallback = Closure<dyn FnMut(Array, MutationObserver)>;
type MessageCallback = Closure<dyn FnMut(MessageEvent)>;

// =============================================================================
// Guard Injection
// =============================================================================

/// Injects the page-realm loader as a `<script>` that removes itself once
/// loaded.
///
/// A script added here runs after whatever the page already parsed. Hosts that
/// register the loader as a main-world `document_start` script pass no URL;
/// the guard is then already installed and injection is a no-op.
pub struct ScriptInjector {
    document: Document,
    url: Option<String>,
}

impl ScriptInjector {
    pub fn new(document: Document, url: Option<String>) -> Self {
        Self { document, url }
    }
}

impl GuardInjector for ScriptInjector {
    fn inject(&mut self) -> Result<(), GuardError> {
        let Some(url) = self.url.as_deref() else {
            log::debug!("No guard script URL, expecting a preloaded page guard");
            return Ok(());
        };
        let patch = |e: JsValue| GuardError::Patch {
            target: url.to_string(),
            reason: describe(&e),
        };

        let script: HtmlScriptElement = self.document.create_element("script").map_err(patch)?.unchecked_into();
        script.set_src(url);

        let loaded = script.clone();
        let on_load = Closure::once_into_js(move || loaded.remove());
        script.set_onload(Some(on_load.unchecked_ref()));

        let parent = self
            .document
            .head()
            .map(Element::from)
            .or_else(|| self.document.document_element())
            .ok_or_else(|| GuardError::Missing("document root".to_string()))?;
        parent.append_child(&script).map_err(patch)?;
        Ok(())
    }
}

// =============================================================================
// Content Handle
// =============================================================================

/// Lifecycle handle for one page load.
#[wasm_bindgen]
pub struct ContentHandle {
    window: Window,
    state: Rc<RefCell<ContentState>>,
    observer: Option<(MutationObserver, MutationCallback)>,
    relay: Option<MessageCallback>,
}

impl ContentHandle {
    pub(crate) fn start(
        window: Window,
        document: Document,
        session: ContentSession,
        guard_url: Option<String>,
    ) -> Result<ContentHandle, JsValue> {
        let state = Rc::new_cyclic(|weak: &Weak<RefCell<ContentState>>| {
            let weak = weak.clone();
            let on_timer = Closure::<dyn FnMut()>::new(move || {
                if let Some(state) = weak.upgrade() {
                    fire(&state);
                }
            });
            RefCell::new(ContentState {
                session,
                dom: WebDom::new(document.clone()),
                timers: BrowserTimers::new(window.clone(), on_timer),
            })
        });

        let active = {
            let mut inner = state.borrow_mut();
            let ContentState { session, dom, .. } = &mut *inner;
            let mut injector = ScriptInjector::new(document.clone(), guard_url);
            session
                .start(dom, &mut injector)
                .map_err(|e| JsValue::from_str(&e.to_string()))?
                .is_some()
        };

        let mut handle = ContentHandle {
            window,
            state,
            observer: None,
            relay: None,
        };
        if active {
            handle.observer = Some(handle.observe(&document)?);
            handle.relay = Some(handle.listen_for_relay()?);
        }
        Ok(handle)
    }

    fn observe(&self, document: &Document) -> Result<(MutationObserver, MutationCallback), JsValue> {
        let weak = Rc::downgrade(&self.state);
        let callback: MutationCallback = Closure::new(move |records: Array, _observer: MutationObserver| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let added = added_elements(&records);
            if added.is_empty() {
                return;
            }
            match state.try_borrow_mut() {
                Ok(mut inner) => {
                    let ContentState { session, dom, timers } = &mut *inner;
                    session.on_mutations(added, dom, timers);
                }
                Err(_) => log::debug!("Mutation batch arrived during a scan, skipping"),
            };
        });

        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);

        let root = document
            .document_element()
            .ok_or_else(|| JsValue::from_str("Document has no root element"))?;
        observer.observe_with_options(&root, &init)?;
        Ok((observer, callback))
    }

    fn listen_for_relay(&self) -> Result<MessageCallback, JsValue> {
        let weak = Rc::downgrade(&self.state);
        let window = self.window.clone();
        let callback: MessageCallback = Closure::new(move |event: MessageEvent| {
            // Only messages the page posts to itself
            let same_window = event
                .source()
                .map(|source| JsValue::from(source) == JsValue::from(window.clone()))
                .unwrap_or(false);
            if !same_window {
                return;
            }
            let (Some(message), Some(state)) = (parse_relay(&event.data()), weak.upgrade()) else {
                return;
            };
            if let Ok(mut inner) = state.try_borrow_mut() {
                inner.session.relay(&message.url, Some(message.kind));
            };
        });

        self.window
            .add_event_listener_with_callback("message", callback.as_ref().unchecked_ref())?;
        Ok(callback)
    }
}

fn added_elements(records: &Array) -> Vec<Element> {
    let mut added = Vec::new();
    for record in records.iter() {
        let Ok(record) = record.dyn_into::<MutationRecord>() else {
            continue;
        };
        let nodes = record.added_nodes();
        added.extend(
            (0..nodes.length())
                .filter_map(|i| nodes.item(i))
                .filter_map(|node| node.dyn_into::<Element>().ok()),
        );
    }
    added
}

fn fire(state: &RefCell<ContentState>) {
    let Ok(mut inner) = state.try_borrow_mut() else {
        log::warn!("Debounce timer fired during a scan, skipping");
        return;
    };
    let ContentState { session, dom, .. } = &mut *inner;
    if let Some(outcome) = session.on_timer(dom) {
        log::debug!("Re-check matched {} added node(s)", outcome.matched);
    }
}

#[wasm_bindgen]
impl ContentHandle {
    /// Disconnect the observer, cancel the pending timer and stop listening
    /// for relayed reports. Call before navigation. Idempotent.
    pub fn teardown(&mut self) {
        if let Some((observer, _callback)) = self.observer.take() {
            observer.disconnect();
        }
        if let Some(callback) = self.relay.take() {
            let _ = self
                .window
                .remove_event_listener_with_callback("message", callback.as_ref().unchecked_ref());
        }
        match self.state.try_borrow_mut() {
            Ok(mut inner) => {
                let ContentState { session, timers, .. } = &mut *inner;
                session.teardown(timers);
            }
            Err(_) => log::warn!("Teardown during a scan, session left running"),
        }
    }

    /// Config changed: tear down and reload so the new config is read.
    pub fn on_config_changed(&mut self) -> Result<(), JsValue> {
        self.teardown();
        self.window.location().reload()
    }

    /// `{active, counts: {ads, trackers, miners, reported, distinctSites}, rescans}`
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        let stats = self.state.borrow().session.stats();
        let json = serde_json::to_string(&stats).map_err(|e| JsValue::from_str(&e.to_string()))?;
        js_sys::JSON::parse(&json)
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().session.activation().is_active()
    }
}
