//! [`Realm`] over the page's `window`.
//!
//! Wrappers are plain `function`s built by a small module-level factory so
//! they keep `this` and stay constructible with `new`, then route through the
//! shared [`PageGuard`]. The factory is bundled JS, not runtime `eval`, so it
//! works under a CSP without `'unsafe-eval'`. Patches are never removed, so
//! their closures are leaked into the JS heap.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use pw_core::guard::{Capability, Dispatch, GuardError, Interception, NetworkCall, PageGuard, Realm};
use pw_core::rules::EntryPoint;
use wasm_bindgen::prelude::*;
use web_sys::Window;

use crate::dom::describe;

pub type SharedGuard = Rc<RefCell<PageGuard<Function>>>;

const BLOCKED_MESSAGE: &str = "Blocked by PageWarden";

#[wasm_bindgen(inline_js = "export function wrapper_for(handler) { return function() { return handler(this, Array.prototype.slice.call(arguments)); }; }")]
extern "C" {
    /// `function() { return handler(this, [...arguments]); }`
    fn wrapper_for(handler: &JsValue) -> Function;
}

/// Own properties a blocked `open()` puts on an XHR instance.
const XHR_SHADOWS: &[&str] = &["readyState", "status", "responseText", "response", "send"];

/// Constructor properties copied onto the `WebSocket` wrapper.
const WEBSOCKET_STATICS: &[&str] = &["prototype", "CONNECTING", "OPEN", "CLOSING", "CLOSED"];

fn key(name: &str) -> JsValue {
    JsValue::from_str(name)
}

fn patch_error(target: &str, e: &JsValue) -> GuardError {
    GuardError::Patch {
        target: target.to_string(),
        reason: describe(e),
    }
}

fn noop() -> JsValue {
    Closure::<dyn Fn()>::new(|| {}).into_js_value()
}

thread_local! {
    static SEND_NOOP: JsValue = noop();
}

/// Owner object and property name of a dotted path under `window`.
fn resolve_owner(window: &Window, path: &str) -> Result<(JsValue, String), GuardError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let property = segments.pop().unwrap_or(path).to_string();

    let mut owner: JsValue = window.clone().into();
    for segment in segments {
        owner = Reflect::get(&owner, &key(segment)).map_err(|e| patch_error(path, &e))?;
        if !owner.is_object() && !owner.is_function() {
            return Err(GuardError::Missing(path.to_string()));
        }
    }
    Ok((owner, property))
}

/// String form of a request target: strings, `URL`s and `Request`s.
fn target_of(value: &JsValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s);
    }
    if !value.is_object() {
        return None;
    }
    if let Ok(url) = Reflect::get(value, &key("url")) {
        if let Some(url) = url.as_string() {
            return Some(url);
        }
    }
    Reflect::get(value, &key("href")).ok().and_then(|href| href.as_string())
}

pub struct BrowserRealm {
    window: Window,
    guard: SharedGuard,
}

impl BrowserRealm {
    pub fn new(window: Window, guard: SharedGuard) -> Self {
        Self { window, guard }
    }

    fn define_value(&self, owner: &JsValue, name: &str, value: &JsValue) -> Result<(), GuardError> {
        Reflect::set(owner, &key(name), value)
            .map_err(|e| patch_error(name, &e))
            .and_then(|ok| if ok { Ok(()) } else { Err(patch_error(name, &key("not writable"))) })
    }

    /// `original` is called directly whenever the guard itself cannot route.
    fn make_wrapper(&self, capability: Capability, original: Function) -> Function {
        let guard = Rc::clone(&self.guard);
        let handler = Closure::<dyn FnMut(JsValue, Array) -> Result<JsValue, JsValue>>::new(
            move |this: JsValue, args: Array| handle_call(&guard, capability, &original, this, args),
        )
        .into_js_value();
        wrapper_for(&handler)
    }
}

impl Realm for BrowserRealm {
    type Original = Function;

    fn neutralize(&mut self, entry: &EntryPoint) -> Result<(), GuardError> {
        let window: JsValue = self.window.clone().into();
        let global = entry.global();
        let existing = Reflect::get(&window, &key(global)).unwrap_or(JsValue::UNDEFINED);

        let replacement: JsValue = match entry {
            EntryPoint::QueuePush { .. } => {
                let queue = if existing.is_object() { existing } else { Array::new().into() };
                self.define_value(&queue, "push", &noop())?;
                queue
            }
            EntryPoint::Function { .. } => noop(),
            EntryPoint::EmptyQueue { .. } => Array::new().into(),
            EntryPoint::KeepQueue { .. } => {
                if existing.is_object() {
                    existing
                } else {
                    Array::new().into()
                }
            }
            EntryPoint::Object { methods, .. } => {
                let object = Object::new();
                for method in methods.iter() {
                    self.define_value(&object, method, &noop())?;
                }
                object.into()
            }
        };
        self.define_value(&window, global, &replacement)
    }

    fn shadow_global(&mut self, name: &str) -> Result<(), GuardError> {
        let descriptor = Object::new();
        let getter = Closure::<dyn Fn() -> JsValue>::new(|| JsValue::UNDEFINED).into_js_value();
        Reflect::set(&descriptor, &key("get"), &getter)
            .and_then(|_| Reflect::set(&descriptor, &key("set"), &noop()))
            .map_err(|e| patch_error(name, &e))?;

        match Reflect::define_property(&self.window, &key(name), &descriptor) {
            Ok(true) => Ok(()),
            Ok(false) => Err(patch_error(name, &key("property is not configurable"))),
            Err(e) => Err(patch_error(name, &e)),
        }
    }

    fn capture(&mut self, capability: Capability) -> Result<Function, GuardError> {
        let (owner, property) = resolve_owner(&self.window, capability.path())?;
        Reflect::get(&owner, &key(&property))
            .map_err(|e| patch_error(capability.path(), &e))?
            .dyn_into::<Function>()
            .map_err(|_| GuardError::Missing(capability.path().to_string()))
    }

    fn wrap(&mut self, capability: Capability) -> Result<(), GuardError> {
        let original = self.capture(capability)?;
        let wrapper = self.make_wrapper(capability, original.clone());

        if capability == Capability::WebSocket {
            for name in WEBSOCKET_STATICS {
                let value = Reflect::get(&original, &key(name)).map_err(|e| patch_error(name, &e))?;
                Reflect::set(&wrapper, &key(name), &value).map_err(|e| patch_error(name, &e))?;
            }
        }

        let (owner, property) = resolve_owner(&self.window, capability.path())?;
        self.define_value(&owner, &property, &wrapper)
    }
}

// =============================================================================
// Wrapped Calls
// =============================================================================

fn handle_call(
    guard: &SharedGuard,
    capability: Capability,
    fallback: &Function,
    this: JsValue,
    args: Array,
) -> Result<JsValue, JsValue> {
    let first = target_of(&args.get(0));
    let second = target_of(&args.get(1));

    let call = match capability {
        Capability::Fetch => NetworkCall::Fetch {
            target: first.as_deref(),
        },
        Capability::XhrOpen => NetworkCall::XhrOpen {
            method: first.as_deref().unwrap_or("GET"),
            target: second.as_deref(),
        },
        Capability::WindowOpen => NetworkCall::WindowOpen {
            target: first.as_deref(),
            name: second.as_deref(),
        },
        Capability::WebSocket => NetworkCall::WebSocket {
            target: first.as_deref(),
        },
    };

    // Release the borrow before calling out: the original may re-enter.
    let decision = match guard.try_borrow_mut() {
        Ok(mut guard) => match guard.dispatch(&call) {
            Ok(Dispatch::Delegate(original)) => Ok(original.clone()),
            Ok(Dispatch::Blocked { interception, .. }) => Err(interception),
            Err(e) => {
                log::warn!("Passing {} through unguarded: {}", capability, e);
                Ok(fallback.clone())
            }
        },
        Err(_) => {
            log::debug!("Page guard busy, passing {} through", capability);
            Ok(fallback.clone())
        }
    };

    match decision {
        Ok(original) => delegate(capability, &original, &this, &args),
        Err(interception) => intercept(interception, &this),
    }
}

fn delegate(capability: Capability, original: &Function, this: &JsValue, args: &Array) -> Result<JsValue, JsValue> {
    match capability {
        Capability::WebSocket => Reflect::construct(original, args),
        Capability::XhrOpen => {
            // A clean open() after a blocked one gets the real request back
            if let Some(xhr) = this.dyn_ref::<Object>() {
                for name in XHR_SHADOWS {
                    Reflect::delete_property(xhr, &key(name))?;
                }
            }
            original.apply(this, args)
        }
        _ => original.apply(this, args),
    }
}

fn intercept(interception: Interception, this: &JsValue) -> Result<JsValue, JsValue> {
    match interception {
        Interception::Reject => {
            let error: JsValue = js_sys::Error::new(BLOCKED_MESSAGE).into();
            Ok(js_sys::Promise::reject(&error).into())
        }
        Interception::EmptyResponse => {
            // open() never ran: report an empty, finished request and make
            // send() a no-op so the caller sees no exception.
            let Some(xhr) = this.dyn_ref::<Object>() else {
                return Ok(JsValue::UNDEFINED);
            };
            let send = SEND_NOOP.with(JsValue::clone);
            for (name, value) in [
                ("readyState", JsValue::from(4)),
                ("status", JsValue::from(0)),
                ("responseText", JsValue::from_str("")),
                ("response", JsValue::from_str("")),
                ("send", send),
            ] {
                let descriptor = Object::new();
                Reflect::set(&descriptor, &key("value"), &value)?;
                Reflect::set(&descriptor, &key("configurable"), &JsValue::TRUE)?;
                Reflect::define_property(xhr, &key(name), &descriptor)?;
            }
            Ok(JsValue::UNDEFINED)
        }
        Interception::NullWindow => Ok(JsValue::NULL),
        Interception::Throw => Err(js_sys::Error::new(BLOCKED_MESSAGE).into()),
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use pw_core::guard::{GuardPolicy, GuardStats};
    use pw_core::Classifier;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn realm() -> (BrowserRealm, SharedGuard) {
        let policy = GuardPolicy::new(Classifier::builtin().unwrap());
        let guard: SharedGuard = Rc::new(RefCell::new(PageGuard::new(policy)));
        let realm = BrowserRealm::new(web_sys::window().unwrap(), Rc::clone(&guard));
        (realm, guard)
    }

    fn array_push() -> Function {
        Reflect::get(&Array::new(), &key("push")).unwrap().dyn_into().unwrap()
    }

    #[wasm_bindgen_test]
    fn test_wrapper_keeps_receiver_and_arguments() {
        let (realm, guard) = realm();
        let wrapper = realm.make_wrapper(Capability::Fetch, array_push());

        // Nothing captured: the clean call falls back to the given original
        let receiver = Array::new();
        let length = wrapper
            .call1(&receiver, &JsValue::from_str("https://example.com/data.json"))
            .unwrap();
        assert_eq!(length.as_f64(), Some(1.0));
        assert_eq!(receiver.get(0).as_string().as_deref(), Some("https://example.com/data.json"));
        assert_eq!(guard.borrow().stats().delegated, 1);
    }

    #[wasm_bindgen_test]
    fn test_wrapper_is_constructible() {
        let (realm, _guard) = realm();
        let constructor: Function = Reflect::get(&web_sys::window().unwrap(), &key("Array"))
            .unwrap()
            .dyn_into()
            .unwrap();
        let wrapper = realm.make_wrapper(Capability::WebSocket, constructor);

        let args = Array::of1(&JsValue::from_str("wss://chat.example.com/socket"));
        let built = Reflect::construct(&wrapper, &args).unwrap();
        assert!(Array::is_array(&built));
        assert_eq!(Array::from(&built).length(), 1);
    }

    #[wasm_bindgen_test]
    fn test_busy_guard_passes_call_through() {
        let (realm, guard) = realm();
        let wrapper = realm.make_wrapper(Capability::Fetch, array_push());

        let receiver = Array::new();
        {
            let _held = guard.borrow_mut();
            wrapper
                .call1(&receiver, &JsValue::from_str("https://example.com/busy.json"))
                .unwrap();
        }
        assert_eq!(receiver.length(), 1);
        assert_eq!(guard.borrow().stats(), GuardStats::default());
    }

    #[wasm_bindgen_test]
    fn test_blocked_call_is_intercepted_not_delegated() {
        let (realm, guard) = realm();
        let wrapper = realm.make_wrapper(Capability::Fetch, array_push());

        let receiver = Array::new();
        let result = wrapper
            .call1(&receiver, &JsValue::from_str("https://securepubads.g.doubleclick.net/gampad/ads"))
            .unwrap();
        assert!(result.is_instance_of::<js_sys::Promise>());
        let swallow = Closure::<dyn FnMut(JsValue)>::new(|_| {});
        let _ = js_sys::Promise::from(result).catch(&swallow);
        swallow.forget();
        assert_eq!(receiver.length(), 0);
        assert_eq!(guard.borrow().stats().blocked, 1);
    }
}
