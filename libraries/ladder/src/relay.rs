//! The messages tabs of one browser exchange, and the bus they travel on.
//!
//! Every message names the identity it is about, and a tab only acts on messages about its own signed-in
//! user. Delivery is best effort: there are no acknowledgements, no sequence numbers, and the last
//! message to arrive wins.

use std::{cell::RefCell, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    level::{ItemId, MasteryLevel},
    session::UserId,
    snapshot::Snapshot,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// A tab is about to do its bulk remote read and asks whether someone already has the data.
    RequestSnapshot { identity: UserId },
    /// A full snapshot, sent in answer to a request or right after a tab finished its own remote read.
    SnapshotLoaded {
        identity: UserId,
        levels: Vec<(ItemId, MasteryLevel)>,
        archived_ids: Vec<ItemId>,
    },
    LevelChanged {
        identity: UserId,
        item_id: ItemId,
        level: MasteryLevel,
    },
    ArchiveToggled {
        identity: UserId,
        item_id: ItemId,
        archived: bool,
    },
}

impl RelayMessage {
    pub fn snapshot_loaded(identity: UserId, snapshot: &Snapshot) -> Self {
        RelayMessage::SnapshotLoaded {
            identity,
            levels: snapshot.levels().collect(),
            archived_ids: snapshot.archived_ids().into_iter().collect(),
        }
    }

    pub fn identity(&self) -> &UserId {
        match self {
            RelayMessage::RequestSnapshot { identity }
            | RelayMessage::SnapshotLoaded { identity, .. }
            | RelayMessage::LevelChanged { identity, .. }
            | RelayMessage::ArchiveToggled { identity, .. } => identity,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to encode relay message")]
    Encode(#[source] serde_json::Error),

    #[error("failed to post relay message: {0}")]
    Post(String),
}

pub type RelayHandler = Box<dyn Fn(RelayMessage)>;

/// Same-origin publish/subscribe. A message is delivered to every subscriber except the ones that
/// subscribed through the posting endpoint, like `BroadcastChannel`.
pub trait LocalBus {
    fn post(&self, message: &RelayMessage) -> Result<(), BusError>;
    fn subscribe(&self, handler: RelayHandler);
}

#[derive(Default)]
struct Hub {
    next_endpoint: usize,
    subscribers: Vec<(usize, Rc<dyn Fn(RelayMessage)>)>,
    history: Vec<RelayMessage>,
}

/// An in-process bus. Each [`MemoryBus::connect`] call opens a new endpoint on the same hub, standing in
/// for one more tab. Delivery is synchronous and goes through the JSON encoding the browser bus uses.
#[derive(Clone)]
pub struct MemoryBus {
    hub: Rc<RefCell<Hub>>,
    endpoint: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let hub = Rc::new(RefCell::new(Hub {
            next_endpoint: 1,
            ..Hub::default()
        }));
        Self { hub, endpoint: 0 }
    }

    pub fn connect(&self) -> Self {
        let mut hub = self.hub.borrow_mut();
        let endpoint = hub.next_endpoint;
        hub.next_endpoint += 1;
        Self {
            hub: Rc::clone(&self.hub),
            endpoint,
        }
    }

    /// Every message posted on the hub so far, from any endpoint.
    pub fn history(&self) -> Vec<RelayMessage> {
        self.hub.borrow().history.clone()
    }
}

impl LocalBus for MemoryBus {
    fn post(&self, message: &RelayMessage) -> Result<(), BusError> {
        let json = message.to_json().map_err(BusError::Encode)?;

        // collect first so handlers are free to post or subscribe themselves
        let recipients = {
            let mut hub = self.hub.borrow_mut();
            hub.history.push(message.clone());
            hub.subscribers
                .iter()
                .filter(|(endpoint, _)| *endpoint != self.endpoint)
                .map(|(_, handler)| Rc::clone(handler))
                .collect::<Vec<_>>()
        };

        for handler in recipients {
            match RelayMessage::from_json(&json) {
                Ok(message) => handler(message),
                Err(e) => log::error!("Failed to decode relay message: {e:?}"),
            }
        }
        Ok(())
    }

    fn subscribe(&self, handler: RelayHandler) {
        self.hub
            .borrow_mut()
            .subscribers
            .push((self.endpoint, Rc::from(handler)));
    }
}
