//! [`Timers`] over `setTimeout`/`clearTimeout`.

use pw_core::watcher::Timers;
use wasm_bindgen::prelude::*;
use web_sys::Window;

use crate::dom::describe;

/// Every timer calls the same callback, which fires the session's watcher.
pub struct BrowserTimers {
    window: Window,
    callback: Closure<dyn FnMut()>,
}

impl BrowserTimers {
    pub fn new(window: Window, callback: Closure<dyn FnMut()>) -> Self {
        Self { window, callback }
    }
}

impl Timers for BrowserTimers {
    /// `None` when the browser refused to schedule.
    type Handle = Option<i32>;

    fn schedule(&mut self, delay_ms: u32) -> Option<i32> {
        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(self.callback.as_ref().unchecked_ref(), delay)
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("setTimeout failed: {}", describe(&e));
                None
            }
        }
    }

    fn cancel(&mut self, handle: Option<i32>) {
        if let Some(handle) = handle {
            self.window.clear_timeout_with_handle(handle);
        }
    }
}
