use std::collections::HashSet;

use tokio::sync::{mpsc, OwnedSemaphorePermit};

use crate::broker::shutdown::Shutdown;
use crate::broker::Broker;
use crate::connection::Connection;
use crate::message::request::RelayRequest;
use crate::message::response::RelayResponse;
use crate::{ProtocolMessage, RelayError};

/// Capacity of the queue holding publications for a single subscribed connection.
const SUBSCRIBER_QUEUE: usize = 128;

/// Per-connection handler. Reads requests from `connection`, applies them to the broker state
/// and writes back the responses, interleaved with the messages published on the channels this
/// connection subscribed to.
#[derive(Debug)]
pub(crate) struct Handler {
    pub(crate) id: u64,
    pub(crate) connection: Connection,
    pub(crate) broker: Broker,
    pub(crate) shutdown: Shutdown,
    pub(crate) _permit: OwnedSemaphorePermit,
    /// Dropped with the handler, the listener waits for every clone to be gone on shutdown.
    pub(crate) _shutdown_complete: mpsc::Sender<()>,
}

impl Handler {
    pub(crate) async fn run(&mut self) -> crate::Result<()> {
        let (messages_tx, mut messages_rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut subscriptions = HashSet::new();

        let result = self
            .serve(&messages_tx, &mut messages_rx, &mut subscriptions)
            .await;

        for channel in subscriptions.iter() {
            self.broker.channels.unsubscribe(channel, self.id);
        }

        debug!("Relay connection {} closed", self.id);
        result
    }

    async fn serve(
        &mut self,
        messages_tx: &mpsc::Sender<RelayResponse>,
        messages_rx: &mut mpsc::Receiver<RelayResponse>,
        subscriptions: &mut HashSet<String>,
    ) -> crate::Result<()> {
        while !self.shutdown.is_shutdown() {
            // While reading a request frame, also listen for publications and the shutdown signal.
            tokio::select! {
                request = self.connection.read_message::<RelayRequest>() => {
                    let response = match request {
                        Ok(Some(request)) => {
                            trace!("Got {} request", request.kind());
                            self.apply(request, messages_tx, subscriptions)
                        }
                        // The peer closed the socket
                        Ok(None) => return Ok(()),
                        Err(RelayError::Malformed(reason)) => {
                            warn!("Dropping malformed request : {}", reason);
                            RelayResponse::Error { reason }
                        }
                        Err(err) => return Err(err),
                    };

                    self.connection.write_message(&response).await?;
                }
                Some(message) = messages_rx.recv() => {
                    self.connection.write_message(&message).await?;
                }
                _ = self.shutdown.recv() => {
                    // If a shutdown signal is received, return from `run`.
                    // This will result in the task terminating.
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    fn apply(
        &self,
        request: RelayRequest,
        messages_tx: &mpsc::Sender<RelayResponse>,
        subscriptions: &mut HashSet<String>,
    ) -> RelayResponse {
        match request {
            RelayRequest::Ping => RelayResponse::Pong,
            RelayRequest::Subscribe { channel } => {
                self.broker
                    .channels
                    .subscribe(&channel, self.id, messages_tx.clone());
                subscriptions.insert(channel.clone());
                RelayResponse::Subscribed { channel }
            }
            RelayRequest::Unsubscribe { channel } => {
                self.broker.channels.unsubscribe(&channel, self.id);
                subscriptions.remove(&channel);
                RelayResponse::Unsubscribed { channel }
            }
            RelayRequest::Publish { channel, payload } => {
                let receivers = self.broker.channels.publish(&channel, &payload);
                debug!("Published on {} to {} subscribers", channel, receivers);
                RelayResponse::Published {
                    receivers: receivers as u32,
                }
            }
            RelayRequest::Get { key } => RelayResponse::Value {
                value: self.broker.keyspace.get(&key),
            },
            RelayRequest::Set {
                key,
                value,
                ttl_secs,
            } => {
                self.broker.keyspace.set(key, value, ttl_secs);
                RelayResponse::Stored
            }
            RelayRequest::Delete { key } => RelayResponse::Deleted {
                existed: self.broker.keyspace.delete(&key),
            },
            RelayRequest::Unknown(code) => RelayResponse::Error {
                reason: format!("unknown request code {}", code),
            },
        }
    }
}
