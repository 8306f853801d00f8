//! In-process event plumbing: the typed pub/sub bus, the early-event queue
//! and the gossip republisher.

mod bus;
mod listener;
mod queue;
mod republisher;

pub use bus::{EventBus, ListenerId};
pub use listener::{Listener, ListenerError, StreamListener};
pub use queue::EventQueue;
pub use republisher::{Republisher, Validator};
