//! The in-process typed pub/sub bus.
//!
//! Topics key delivery; payloads are opaque byte vectors whose layout is the
//! wire payload for that topic. Delivery is synchronous for callback
//! listeners and best-effort for channel and stream listeners. Publishes from
//! one producer reach one listener in publish order; across producers the
//! order is arbitrary.

use crate::{Listener, StreamListener};
use dashmap::DashMap;
use sba_wire::{prepend_topic, Topic};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

struct Entry {
    id: ListenerId,
    listener: Arc<Listener>,
}

/// The event bus.
///
/// Cheap to share: wrap in an `Arc` and clone the handle everywhere.
pub struct EventBus {
    listeners: DashMap<Topic, Vec<Entry>>,
    defaults: Mutex<Vec<Entry>>,
    default_topics: Mutex<Vec<Topic>>,
    next_id: AtomicU32,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            defaults: Mutex::new(Vec::new()),
            default_topics: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn fresh_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach a listener to a topic.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> ListenerId {
        let id = self.fresh_id();
        self.listeners.entry(topic).or_default().push(Entry {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Detach a listener. Returns `true` if it was present.
    pub fn unsubscribe(&self, topic: Topic, id: ListenerId) -> bool {
        match self.listeners.get_mut(&topic) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|e| e.id != id);
                entries.len() != before
            }
            None => false,
        }
    }

    /// Attach a wildcard listener receiving every topic registered via
    /// [`EventBus::add_default_topic`]. Default listeners receive the
    /// topic-prefixed frame so they can tell events apart.
    pub fn subscribe_default(&self, listener: Listener) -> ListenerId {
        let id = self.fresh_id();
        self.defaults.lock().expect("defaults lock").push(Entry {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Route a topic to the default listeners.
    pub fn add_default_topic(&self, topic: Topic) {
        let mut topics = self.default_topics.lock().expect("default topics lock");
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    /// Snapshot the live listeners for a topic, collecting dead ones.
    fn snapshot(&self, topic: Topic) -> Vec<Arc<Listener>> {
        match self.listeners.get_mut(&topic) {
            Some(mut entries) => {
                entries.retain(|e| match e.listener.as_ref() {
                    Listener::Stream(s) => !s.is_closed(),
                    _ => true,
                });
                entries.iter().map(|e| Arc::clone(&e.listener)).collect()
            }
            None => Vec::new(),
        }
    }

    /// Publish a payload to all subscribers of `topic`, plus the default
    /// listeners when the topic is registered as default.
    ///
    /// Listeners are invoked outside the map lock, so a callback may
    /// re-enter the bus.
    pub fn publish(&self, topic: Topic, payload: &[u8]) {
        for listener in self.snapshot(topic) {
            listener.deliver(payload.to_vec());
        }

        if self
            .default_topics
            .lock()
            .expect("default topics lock")
            .contains(&topic)
        {
            let defaults: Vec<Arc<Listener>> = {
                let mut entries = self.defaults.lock().expect("defaults lock");
                entries.retain(|e| match e.listener.as_ref() {
                    Listener::Stream(s) => !s.is_closed(),
                    _ => true,
                });
                entries.iter().map(|e| Arc::clone(&e.listener)).collect()
            };
            let framed = prepend_topic(topic, payload);
            for listener in defaults {
                listener.deliver(framed.clone());
            }
        }
    }

    /// Forward a topic-prefixed frame to the stream subscribers of `topic`.
    ///
    /// This is the outbound gossip edge: the payload is prefixed with the
    /// stream topic byte and written through each subscriber's ring.
    pub fn stream(&self, topic: Topic, payload: &[u8]) {
        let framed = prepend_topic(topic, payload);
        for listener in self.snapshot(topic) {
            if matches!(listener.as_ref(), Listener::Stream(_)) {
                listener.deliver(framed.clone());
            }
        }
    }

    /// Test support: whether a topic still has a live stream listener.
    pub fn has_stream_listener(&self, topic: Topic) -> bool {
        self.snapshot(topic)
            .iter()
            .any(|l| matches!(l.as_ref(), Listener::Stream(s) if !s.is_closed()))
    }
}

// StreamListener is re-exported for tests that need to poke at ring state.
impl From<StreamListener> for Listener {
    fn from(stream: StreamListener) -> Self {
        Listener::Stream(stream)
    }
}
