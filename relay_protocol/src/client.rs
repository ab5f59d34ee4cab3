use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::{connect, Connection};
use crate::message::request::RelayRequest;
use crate::message::MAX_FRAME_LEN;
use crate::message::response::RelayResponse;
use crate::{ProtocolMessage, RelayError};

/// A request/response client for the relay broker key space and publications.
///
/// Requests are serialized over a single connection, which is re-opened once when the broker
/// dropped it. This connection must never subscribe to a channel : pushed messages would be
/// mistaken for responses.
///
/// Responses are paired with requests by position. A caller dropped while waiting for its
/// response leaves the link marked in flight, the next request then starts on a fresh connection.
#[derive(Debug, Clone)]
pub struct RelayClient {
    address: String,
    link: Arc<Mutex<Link>>,
}

#[derive(Debug)]
struct Link {
    connection: Connection,
    in_flight: bool,
}

impl RelayClient {
    pub async fn connect(address: &str) -> crate::Result<Self> {
        let connection = connect(address).await?;
        Ok(RelayClient {
            address: address.to_string(),
            link: Arc::new(Mutex::new(Link {
                connection,
                in_flight: false,
            })),
        })
    }

    pub async fn ping(&self) -> crate::Result<()> {
        match self.request(RelayRequest::Ping).await? {
            RelayResponse::Pong => Ok(()),
            other => Err(self.unexpected(&other).await),
        }
    }

    pub async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let request = RelayRequest::Get {
            key: key.to_string(),
        };

        match self.request(request).await? {
            RelayResponse::Value { value } => Ok(value),
            other => Err(self.unexpected(&other).await),
        }
    }

    pub async fn set(&self, key: &str, value: String, ttl_secs: u32) -> crate::Result<()> {
        let request = RelayRequest::Set {
            key: key.to_string(),
            value,
            ttl_secs,
        };

        match self.request(request).await? {
            RelayResponse::Stored => Ok(()),
            other => Err(self.unexpected(&other).await),
        }
    }

    pub async fn delete(&self, key: &str) -> crate::Result<bool> {
        let request = RelayRequest::Delete {
            key: key.to_string(),
        };

        match self.request(request).await? {
            RelayResponse::Deleted { existed } => Ok(existed),
            other => Err(self.unexpected(&other).await),
        }
    }

    /// Publish a payload and return the number of subscribers it was queued for.
    pub async fn publish(&self, channel: &str, payload: String) -> crate::Result<u32> {
        let request = RelayRequest::Publish {
            channel: channel.to_string(),
            payload,
        };

        match self.request(request).await? {
            RelayResponse::Published { receivers } => Ok(receivers),
            other => Err(self.unexpected(&other).await),
        }
    }

    async fn request(&self, request: RelayRequest) -> crate::Result<RelayResponse> {
        let len = request.payload_len();
        if len > MAX_FRAME_LEN {
            return Err(RelayError::FrameTooLarge(len));
        }

        let mut link = self.link.lock().await;

        if link.in_flight {
            warn!(
                "Relay connection out of sync before sending {}, reconnecting to {}",
                request.kind(),
                self.address
            );
            link.connection = connect(self.address.as_str()).await?;
            link.in_flight = false;
        }

        // Cleared once the response is read, a cancelled caller leaves it set
        link.in_flight = true;

        let result = match Self::exchange(&mut link.connection, &request).await {
            Err(RelayError::ConnectionReset) | Err(RelayError::Other(_)) => {
                warn!(
                    "Relay connection lost while sending {}, reconnecting to {}",
                    request.kind(),
                    self.address
                );
                link.connection = connect(self.address.as_str()).await?;
                Self::exchange(&mut link.connection, &request).await
            }
            result => result,
        };

        link.in_flight = matches!(
            result,
            Err(RelayError::ConnectionReset) | Err(RelayError::Other(_))
        );

        result
    }

    /// A response of the wrong kind means the pairing is lost, drop the connection.
    async fn unexpected(&self, response: &RelayResponse) -> RelayError {
        self.link.lock().await.in_flight = true;
        RelayError::UnexpectedResponse(response.kind().to_string())
    }

    async fn exchange(
        connection: &mut Connection,
        request: &RelayRequest,
    ) -> crate::Result<RelayResponse> {
        connection.write_message(request).await?;

        match connection.read_message::<RelayResponse>().await? {
            Some(RelayResponse::Error { reason }) => Err(RelayError::Remote(reason)),
            Some(response) => Ok(response),
            None => Err(RelayError::ConnectionReset),
        }
    }
}
