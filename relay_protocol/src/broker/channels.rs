use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::message::response::RelayResponse;

type Subscribers = HashMap<u64, mpsc::Sender<RelayResponse>>;

/// Channel registry, maps a channel name to the queues of the connections subscribed to it.
#[derive(Debug, Clone, Default)]
pub struct Channels {
    channels: Arc<Mutex<HashMap<String, Subscribers>>>,
}

impl Channels {
    pub fn subscribe(&self, channel: &str, subscriber: u64, sender: mpsc::Sender<RelayResponse>) {
        let mut channels = self
            .channels
            .lock()
            .expect("Unable to acquire lock on channels");

        channels
            .entry(channel.to_string())
            .or_default()
            .insert(subscriber, sender);

        debug!("Subscriber {} joined channel {}", subscriber, channel);
    }

    pub fn unsubscribe(&self, channel: &str, subscriber: u64) {
        let mut channels = self
            .channels
            .lock()
            .expect("Unable to acquire lock on channels");

        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&subscriber);

            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Queue `payload` for every subscriber of `channel` and return how many accepted it.
    /// Subscribers with a full queue miss the message, closed ones are removed.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut channels = self
            .channels
            .lock()
            .expect("Unable to acquire lock on channels");

        let subscribers = match channels.get_mut(channel) {
            Some(subscribers) => subscribers,
            None => return 0,
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber, sender| {
            let message = RelayResponse::Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };

            match sender.try_send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} is lagging, dropping message on channel {}",
                        subscriber, channel
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        if subscribers.is_empty() {
            channels.remove(channel);
        }

        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .expect("Unable to acquire lock on channels")
            .get(channel)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::Channels;
    use crate::message::response::RelayResponse;

    #[test]
    fn publish_reaches_every_subscriber_of_the_channel_only() {
        let channels = Channels::default();
        let (alice_tx, mut alice_rx) = mpsc::channel(4);
        let (bob_tx, mut bob_rx) = mpsc::channel(4);
        let (carol_tx, mut carol_rx) = mpsc::channel(4);
        channels.subscribe("chat", 1, alice_tx);
        channels.subscribe("chat", 2, bob_tx);
        channels.subscribe("other", 3, carol_tx);

        let delivered = channels.publish("chat", "hello");

        assert_eq!(delivered, 2);
        let expected = RelayResponse::Message {
            channel: "chat".to_string(),
            payload: "hello".to_string(),
        };
        assert_eq!(alice_rx.try_recv().unwrap(), expected);
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let channels = Channels::default();
        let (alice_tx, alice_rx) = mpsc::channel(4);
        let (bob_tx, _bob_rx) = mpsc::channel(4);
        channels.subscribe("chat", 1, alice_tx);
        channels.subscribe("chat", 2, bob_tx);
        drop(alice_rx);

        assert_eq!(channels.publish("chat", "hello"), 1);
        assert_eq!(channels.subscriber_count("chat"), 1);
    }

    #[test]
    fn lagging_subscriber_misses_messages_but_stays_subscribed() {
        let channels = Channels::default();
        let (tx, mut rx) = mpsc::channel(1);
        channels.subscribe("chat", 1, tx);

        assert_eq!(channels.publish("chat", "first"), 1);
        assert_eq!(channels.publish("chat", "second"), 0);
        assert_eq!(channels.subscriber_count("chat"), 1);

        assert!(matches!(
            rx.try_recv().unwrap(),
            RelayResponse::Message { payload, .. } if payload == "first"
        ));
    }

    #[test]
    fn unsubscribe_removes_empty_channels() {
        let channels = Channels::default();
        let (tx, _rx) = mpsc::channel(1);
        channels.subscribe("chat", 1, tx);

        channels.unsubscribe("chat", 1);

        assert_eq!(channels.subscriber_count("chat"), 0);
        assert_eq!(channels.publish("chat", "nobody"), 0);
    }
}
