//! Validate-and-regossip edge.

use crate::{EventBus, Listener, ListenerError, ListenerId};
use sba_wire::{prepend_topic, Topic};
use std::sync::Arc;
use tracing::debug;

/// A validation hook run before a message is re-gossiped.
pub type Validator = Box<dyn Fn(&[u8]) -> Result<(), ListenerError> + Send + Sync>;

/// Re-propagates messages of one topic onto the gossip stream after
/// validation. A failing validator drops the message silently (logged).
pub struct Republisher {
    bus: Arc<EventBus>,
    topic: Topic,
    id: ListenerId,
}

impl Republisher {
    pub fn new(bus: Arc<EventBus>, topic: Topic, validators: Vec<Validator>) -> Self {
        let forwarding = Arc::clone(&bus);
        let id = bus.subscribe(
            topic,
            Listener::callback(move |payload| {
                for validator in &validators {
                    if let Err(err) = validator(&payload) {
                        debug!(target: "republisher", ?topic, %err, "dropping invalid message");
                        return Err(err);
                    }
                }
                let framed = prepend_topic(topic, &payload);
                forwarding.publish(Topic::Gossip, &framed);
                Ok(())
            }),
        );
        Self { bus, topic, id }
    }

    /// Detach from the bus.
    pub fn stop(&self) {
        self.bus.unsubscribe(self.topic, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gossip_probe(bus: &EventBus) -> tokio::sync::mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = tokio::sync::mpsc::channel(10);
        bus.subscribe(Topic::Gossip, Listener::channel(tx));
        rx
    }

    #[tokio::test]
    async fn valid_message_is_reframed_and_gossiped() {
        let bus = Arc::new(EventBus::new());
        let mut gossip = gossip_probe(&bus);
        let _republisher = Republisher::new(Arc::clone(&bus), Topic::Block, vec![]);

        bus.publish(Topic::Block, b"blockbytes");

        let frame = gossip.recv().await.unwrap();
        assert_eq!(frame[0], Topic::Block.as_byte());
        assert_eq!(&frame[1..], b"blockbytes");
    }

    #[tokio::test]
    async fn failing_validator_drops_message() {
        let bus = Arc::new(EventBus::new());
        let mut gossip = gossip_probe(&bus);
        let _republisher = Republisher::new(
            Arc::clone(&bus),
            Topic::Block,
            vec![Box::new(|_| Err(ListenerError::new("bad block")))],
        );

        bus.publish(Topic::Block, b"blockbytes");
        assert!(gossip.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_detaches() {
        let bus = Arc::new(EventBus::new());
        let mut gossip = gossip_probe(&bus);
        let republisher = Republisher::new(Arc::clone(&bus), Topic::Block, vec![]);
        republisher.stop();

        bus.publish(Topic::Block, b"blockbytes");
        assert!(gossip.try_recv().is_err());
    }
}
