//! Report sinks for the two browser realms.
//!
//! - [`RuntimeSink`] runs in the content script and sends
//!   `chrome.runtime.sendMessage({action: "blockAd", url, type})`.
//! - [`RelaySink`] runs in the page realm, which cannot reach the extension
//!   runtime, and posts the same message to the content script's window
//!   listener.

use js_sys::{Function, Reflect};
use pw_core::report::{BlockMessage, ReportError, ReportSink};
use pw_core::types::SuppressionEvent;
use wasm_bindgen::prelude::*;
use web_sys::Window;

use crate::dom::describe;

/// `source` field of relayed page-realm messages.
pub const RELAY_SOURCE: &str = "pagewarden-guard";

pub(crate) fn to_js_message(message: &BlockMessage) -> Result<JsValue, ReportError> {
    let json = serde_json::to_string(message).map_err(|e| ReportError::Send(e.to_string()))?;
    js_sys::JSON::parse(&json).map_err(|e| ReportError::Send(describe(&e)))
}

fn lookup(root: &JsValue, path: &[&str]) -> Result<JsValue, ReportError> {
    let mut value = root.clone();
    for key in path {
        value = Reflect::get(&value, &JsValue::from_str(key)).map_err(|e| ReportError::Unavailable(describe(&e)))?;
        if value.is_undefined() || value.is_null() {
            return Err(ReportError::Unavailable(path.join(".")));
        }
    }
    Ok(value)
}

// =============================================================================
// Runtime Sink
// =============================================================================

/// Sends events to the background worker. Fire-and-forget: the completion
/// callback only logs `chrome.runtime.lastError`.
#[derive(Debug, Default)]
pub struct RuntimeSink;

impl RuntimeSink {
    pub fn new() -> Self {
        Self
    }
}

impl ReportSink for RuntimeSink {
    fn report(&self, event: SuppressionEvent) -> Result<(), ReportError> {
        let global: JsValue = js_sys::global().into();
        let runtime = lookup(&global, &["chrome", "runtime"])?;
        let send: Function = lookup(&runtime, &["sendMessage"])?
            .dyn_into()
            .map_err(|_| ReportError::Unavailable("chrome.runtime.sendMessage".to_string()))?;

        let message = to_js_message(&BlockMessage::from(&event))?;
        let identifier = event.identifier;
        let on_reply = Closure::once_into_js(move || {
            let global: JsValue = js_sys::global().into();
            if let Ok(error) = lookup(&global, &["chrome", "runtime", "lastError"]) {
                let reason = Reflect::get(&error, &JsValue::from_str("message"))
                    .ok()
                    .and_then(|m| m.as_string())
                    .unwrap_or_default();
                log::warn!("Report for {} not delivered: {}", identifier, reason);
            }
        });

        send.call2(&runtime, &message, &on_reply)
            .map(|_| ())
            .map_err(|e| ReportError::Send(describe(&e)))
    }
}

// =============================================================================
// Relay Sink
// =============================================================================

/// Posts events from the page realm to the content script.
pub struct RelaySink {
    window: Window,
}

impl RelaySink {
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

impl ReportSink for RelaySink {
    fn report(&self, event: SuppressionEvent) -> Result<(), ReportError> {
        let payload = js_sys::Object::new();
        let message = to_js_message(&BlockMessage::from(&event))?;
        Reflect::set(&payload, &JsValue::from_str("source"), &JsValue::from_str(RELAY_SOURCE))
            .and_then(|_| Reflect::set(&payload, &JsValue::from_str("message"), &message))
            .map_err(|e| ReportError::Send(describe(&e)))?;

        let origin = self.window.location().origin().unwrap_or_else(|_| "*".to_string());
        self.window
            .post_message(&payload, &origin)
            .map_err(|e| ReportError::Send(describe(&e)))
    }
}

/// Read a relayed message back. `None` for anything else on the channel.
pub(crate) fn parse_relay(data: &JsValue) -> Option<BlockMessage> {
    let source = Reflect::get(data, &JsValue::from_str("source")).ok()?.as_string()?;
    if source != RELAY_SOURCE {
        return None;
    }
    let message = Reflect::get(data, &JsValue::from_str("message")).ok()?;
    let json = js_sys::JSON::stringify(&message).ok()?.as_string()?;
    let parsed: BlockMessage = serde_json::from_str(&json).ok()?;
    (parsed.action == BlockMessage::ACTION).then_some(parsed)
}
