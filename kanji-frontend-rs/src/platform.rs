//! The store's collaborators for whatever we're compiled for. In the browser that's `localStorage`,
//! `BroadcastChannel` and `setTimeout`; natively (tests, tooling) everything lives in memory.

#[cfg(target_arch = "wasm32")]
mod imp {
    pub use ladder::web::{BroadcastChannelBus as Bus, WebStorage as Storage, WebTimer as Timer};

    pub fn storage() -> Storage {
        Storage::new()
    }

    pub fn bus(channel: &str) -> Option<Bus> {
        Bus::new(channel)
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod imp {
    pub use ladder::{ImmediateTimer as Timer, MemoryBus as Bus, MemoryStorage as Storage};

    pub fn storage() -> Storage {
        Storage::new()
    }

    pub fn bus(_channel: &str) -> Option<Bus> {
        Some(Bus::new())
    }
}

pub use imp::*;
