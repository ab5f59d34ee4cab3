use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::task::JoinHandle;
use warp::ws::Message;

use relay_protocol::message::ChannelMessage;

use crate::event::{chat_frame, ChatRecord};

pub type Clients = Arc<Mutex<HashMap<usize, UnboundedSender<Message>>>>;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Every websocket connected to this process.
#[derive(Default, Clone, Debug)]
pub struct Broadcaster {
    clients: Clients,
}

impl Broadcaster {
    pub(crate) fn register(&self, tx: UnboundedSender<Message>) -> usize {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        self.clients
            .lock()
            .expect("Unable to acquire lock on websocket clients")
            .insert(id, tx);
        id
    }

    pub(crate) fn unregister(&self, id: usize) {
        self.clients
            .lock()
            .expect("Unable to acquire lock on websocket clients")
            .remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .expect("Unable to acquire lock on websocket clients")
            .len()
    }

    fn send_message_to_clients(&self, frame: &str) {
        let mut clients = self
            .clients
            .lock()
            .expect("Unable to acquire lock on websocket clients");

        // Keep only clients whose socket task is still alive
        clients.retain(|id, client| match client.send(Message::text(frame)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Websocket client {} is gone", id);
                false
            }
        });
    }

    /// Deliver every message received from the relay to the connected websockets.
    pub fn dispatch_relay_message(&self, mut rx: Receiver<ChannelMessage>) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::task::spawn(async move {
            info!("Starting to dispatch relay messages to websocket clients");
            while let Some(message) = rx.recv().await {
                if let Err(err) = ChatRecord::from_payload(&message.payload) {
                    warn!(
                        "Dropping malformed payload on channel {} : {}",
                        message.channel, err
                    );
                    continue;
                }

                match chat_frame(&message.payload) {
                    Ok(frame) => broadcaster.send_message_to_clients(&frame),
                    Err(err) => error!("Unable to build chat frame : {}", err),
                }
            }
            info!("Relay message stream closed");
        })
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use relay_protocol::message::ChannelMessage;

    use crate::broadcast::Broadcaster;
    use crate::event::ChatRecord;

    #[tokio::test]
    async fn malformed_payloads_are_not_delivered() {
        let broadcaster = Broadcaster::default();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        broadcaster.register(client_tx);

        let (relay_tx, relay_rx) = mpsc::channel(4);
        let dispatcher = broadcaster.dispatch_relay_message(relay_rx);

        let valid = ChatRecord::message("alice", "hi").to_payload().unwrap();
        relay_tx
            .send(ChannelMessage::new("chat", "garbage".to_string()))
            .await
            .unwrap();
        relay_tx
            .send(ChannelMessage::new("chat", valid.clone()))
            .await
            .unwrap();
        drop(relay_tx);
        dispatcher.await.unwrap();

        let frame = client_rx.recv().await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
        assert_eq!(frame["data"], valid.as_str());
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_clients_are_pruned() {
        let broadcaster = Broadcaster::default();
        let (alive_tx, _alive_rx) = mpsc::unbounded_channel();
        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        broadcaster.register(alive_tx);
        broadcaster.register(gone_tx);
        drop(gone_rx);

        broadcaster.send_message_to_clients("{}");

        assert_eq!(broadcaster.client_count(), 1);
    }
}
