/// Code and documentation from this module have been heavily inspired by tokio [mini-redis](https://github.com/tokio-rs/mini-redis/blob/master/src/server.rs)
/// tutorial.
use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing_futures::Instrument;

use crate::connection::Connection;
use crate::RelayError;

pub use channels::Channels;
pub use keyspace::Keyspace;

use handler::Handler;
use shutdown::Shutdown;

mod channels;
mod handler;
mod keyspace;
mod shutdown;

pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// State shared by every broker connection.
#[derive(Debug, Clone, Default)]
pub struct Broker {
    pub channels: Channels,
    pub keyspace: Keyspace,
}

/// Broker listener state. Created in the `run` call. It includes a `run` method
/// which performs the TCP listening and initialization of per-connection state.
#[derive(Debug)]
struct Listener {
    /// TCP listener supplied by the `run` caller.
    listener: TcpListener,
    broker: Broker,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    next_connection_id: u64,
}

/// Run the relay broker until `shutdown` completes.
///
/// Accepts connections from `listener` and spawns a task per connection, at most
/// `max_connections` at once. Once `shutdown` resolves, every connection is notified and this
/// function returns when all of them are done.
pub async fn run(
    listener: TcpListener,
    shutdown: impl Future,
    max_connections: usize,
) -> crate::Result<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

    // Initialize the listener state
    let mut server = Listener {
        listener,
        broker: Broker::default(),
        limit_connections: Arc::new(Semaphore::new(max_connections)),
        notify_shutdown,
        shutdown_complete_tx,
        shutdown_complete_rx,
        next_connection_id: 0,
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    let Listener {
        mut shutdown_complete_rx,
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;

    // Every subscribed handler receives the shutdown signal and exits.
    drop(notify_shutdown);
    // Drop final `Sender` so the `Receiver` below can complete
    drop(shutdown_complete_tx);

    // Wait for all active connections to finish processing. As the `Sender`
    // handle held by the listener has been dropped above, the only remaining
    // `Sender` instances are held by connection handler tasks. When those drop,
    // the `mpsc` channel will close and `recv()` will return `None`.
    let _ = shutdown_complete_rx.recv().await;

    Ok(())
}

impl Listener {
    async fn run(&mut self) -> crate::Result<()> {
        info!(
            "Relay broker accepting inbound connections on {:?}",
            self.listener.local_addr().ok()
        );

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| RelayError::from("connection limit semaphore closed"))?;

            let socket = self.accept().await?;
            socket.set_nodelay(true)?;

            self.next_connection_id += 1;
            let id = self.next_connection_id;

            let mut handler = Handler {
                id,
                connection: Connection::new(socket),
                broker: self.broker.clone(),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _permit: permit,
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(
                async move {
                    if let Err(err) = handler.run().await {
                        error!(cause = ?err, "relay connection error");
                    }
                }
                .instrument(info_span!("relay_connection", id)),
            );
        }
    }

    /// Accept an inbound connection.
    ///
    /// Errors are handled by backing off and retrying. An exponential backoff
    /// strategy is used. After the first failure, the task waits for 1 second.
    /// After the second failure, the task waits for 2 seconds. Each subsequent
    /// failure doubles the wait time. If accepting fails on the 6th try after
    /// waiting for 64 seconds, then this function returns with an error.
    async fn accept(&mut self) -> crate::Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, address)) => {
                    debug!("Relay connection accepted from {}", address);
                    return Ok(socket);
                }
                Err(err) => {
                    if backoff > 64 {
                        // Accept has failed too many times. Return the error.
                        return Err(err.into());
                    }
                }
            }

            // Pause execution until the back off period elapses.
            time::sleep(Duration::from_secs(backoff)).await;

            // Double the back off
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use crate::client::RelayClient;
    use crate::connection::{connect, Connection};
    use crate::message::request::RelayRequest;
    use crate::message::response::RelayResponse;
    use crate::RelayError;

    async fn start_broker() -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            super::run(listener, stop_rx, 16).await.unwrap();
        });

        (address, stop_tx, handle)
    }

    async fn subscribe(address: &str, channel: &str) -> Connection {
        let mut connection = connect(address).await.unwrap();
        connection
            .write_message(&RelayRequest::Subscribe {
                channel: channel.to_string(),
            })
            .await
            .unwrap();

        let response = connection.read_message::<RelayResponse>().await.unwrap();
        assert_eq!(
            response,
            Some(RelayResponse::Subscribed {
                channel: channel.to_string()
            })
        );

        connection
    }

    async fn next_message(connection: &mut Connection) -> Option<RelayResponse> {
        timeout(Duration::from_secs(2), connection.read_message::<RelayResponse>())
            .await
            .expect("timed out waiting for a relay message")
            .unwrap()
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let (address, _stop, _handle) = start_broker().await;
        let mut first = subscribe(&address, "chat").await;
        let mut second = subscribe(&address, "chat").await;
        let mut elsewhere = subscribe(&address, "other").await;

        let client = RelayClient::connect(&address).await.unwrap();
        let receivers = client
            .publish("chat", r#"{"action":"control"}"#.to_string())
            .await
            .unwrap();

        assert_eq!(receivers, 2);
        let expected = Some(RelayResponse::Message {
            channel: "chat".to_string(),
            payload: r#"{"action":"control"}"#.to_string(),
        });
        assert_eq!(next_message(&mut first).await, expected);
        assert_eq!(next_message(&mut second).await, expected);

        let nothing = timeout(
            Duration::from_millis(100),
            elsewhere.read_message::<RelayResponse>(),
        )
        .await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn key_space_is_shared_between_clients() {
        let (address, _stop, _handle) = start_broker().await;
        let writer = RelayClient::connect(&address).await.unwrap();
        let reader = RelayClient::connect(&address).await.unwrap();

        writer.ping().await.unwrap();
        writer
            .set("sess:abc", "alice".to_string(), 0)
            .await
            .unwrap();

        assert_eq!(reader.get("sess:abc").await.unwrap(), Some("alice".to_string()));
        assert!(reader.delete("sess:abc").await.unwrap());
        assert_eq!(writer.get("sess:abc").await.unwrap(), None);
        assert!(!writer.delete("sess:abc").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_request_gets_an_error_frame() {
        let (address, _stop, _handle) = start_broker().await;
        let mut connection = connect(address.as_str()).await.unwrap();

        connection
            .write_message(&RelayRequest::Unknown(42))
            .await
            .unwrap();
        let response = connection.read_message::<RelayResponse>().await.unwrap();

        assert_eq!(
            response,
            Some(RelayResponse::Error {
                reason: "unknown request code 42".to_string()
            })
        );

        // The connection is still usable
        connection.write_message(&RelayRequest::Ping).await.unwrap();
        let response = connection.read_message::<RelayResponse>().await.unwrap();
        assert_eq!(response, Some(RelayResponse::Pong));
    }

    #[tokio::test]
    async fn shutdown_closes_subscribed_connections() {
        let (address, stop, handle) = start_broker().await;
        let mut subscriber = subscribe(&address, "chat").await;

        stop.send(()).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("broker did not shut down")
            .unwrap();

        assert_eq!(next_message(&mut subscriber).await, None);
        assert!(matches!(
            RelayClient::connect(&address).await,
            Err(RelayError::Other(_)) | Err(RelayError::ConnectionReset)
        ));
    }
}
