//! Browser implementations of the store's collaborators.

use std::{cell::RefCell, rc::Rc, time::Duration};

use wasm_bindgen::{JsCast, JsValue, closure::Closure};
use web_sys::{BroadcastChannel, MessageEvent, Storage};

use crate::{
    backend::{DeviceStorage, Timer},
    error::StorageError,
    relay::{BusError, LocalBus, RelayHandler, RelayMessage},
};

/// `window.localStorage`.
#[derive(Clone, Debug)]
pub struct WebStorage {
    storage: Option<Storage>,
}

impl Default for WebStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl WebStorage {
    /// Private browsing modes can refuse storage entirely. Every call then fails with
    /// [`StorageError::Unavailable`] and the store carries on with an empty snapshot.
    pub fn new() -> Self {
        let storage = web_sys::window()
            .and_then(|window| {
                window
                    .local_storage()
                    .inspect_err(|e| log::error!("Failed to open localStorage: {e:?}"))
                    .ok()
            })
            .flatten();
        Self { storage }
    }

    fn storage(&self) -> Result<&Storage, StorageError> {
        self.storage.as_ref().ok_or(StorageError::Unavailable)
    }
}

impl DeviceStorage for WebStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage()?
            .get_item(key)
            .map_err(|_| StorageError::Unavailable)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage()?
            .set_item(key, value)
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                message: format!("{e:?}"),
            })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                message: format!("{e:?}"),
            })
    }
}

type Handlers = Rc<RefCell<Vec<Rc<dyn Fn(RelayMessage)>>>>;

/// A `BroadcastChannel` carrying [`RelayMessage`]s as JSON strings.
pub struct BroadcastChannelBus {
    channel: BroadcastChannel,
    handlers: Handlers,
    // dropping this would detach `onmessage`
    _on_message: Closure<dyn FnMut(MessageEvent)>,
}

impl BroadcastChannelBus {
    /// `None` if the browser has no `BroadcastChannel`; tabs then don't coordinate at all.
    pub fn new(name: &str) -> Option<Self> {
        let channel = BroadcastChannel::new(name)
            .inspect_err(|e| log::error!("Failed to create BroadcastChannel: {e:?}"))
            .ok()?;

        let handlers: Handlers = Rc::default();
        let on_message = {
            let handlers = Rc::clone(&handlers);
            Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                let Some(json) = event.data().as_string() else {
                    log::warn!("Ignoring non-string message on the progress channel");
                    return;
                };
                let message = match RelayMessage::from_json(&json) {
                    Ok(message) => message,
                    Err(e) => {
                        log::error!("Failed to decode relay message: {e:?}");
                        return;
                    }
                };
                let recipients: Vec<_> = handlers.borrow().iter().cloned().collect();
                for handler in recipients {
                    handler(message.clone());
                }
            })
        };
        channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        Some(Self {
            channel,
            handlers,
            _on_message: on_message,
        })
    }
}

impl Drop for BroadcastChannelBus {
    fn drop(&mut self) {
        self.channel.set_onmessage(None);
        self.channel.close();
    }
}

impl LocalBus for BroadcastChannelBus {
    fn post(&self, message: &RelayMessage) -> Result<(), BusError> {
        let json = message.to_json().map_err(BusError::Encode)?;
        self.channel
            .post_message(&JsValue::from_str(&json))
            .map_err(|e| BusError::Post(format!("{e:?}")))
    }

    fn subscribe(&self, handler: RelayHandler) {
        self.handlers.borrow_mut().push(Rc::from(handler));
    }
}

/// `setTimeout`, awaited through a promise.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebTimer;

impl Timer for WebTimer {
    async fn sleep(&self, duration: Duration) {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _| {
            let scheduled = web_sys::window()
                .ok_or_else(|| JsValue::from_str("no window"))
                .and_then(|window| {
                    window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
                });
            if let Err(e) = scheduled {
                log::error!("Failed to schedule timeout: {e:?}");
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
    }
}
