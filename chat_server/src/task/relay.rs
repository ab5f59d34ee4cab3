use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing_futures::Instrument;

use relay_protocol::client::RelayClient;
use relay_protocol::connection::connect;
use relay_protocol::message::request::RelayRequest;
use relay_protocol::message::response::RelayResponse;
use relay_protocol::message::ChannelMessage;
use relay_protocol::{ProtocolMessage, RelayError};

const MAX_BACKOFF_SECS: u64 = 64;

/// Bridge the local chat traffic with the relay broker at `address`.
///
/// Records received on `publish_rx` are published on the broker, messages delivered on `channel`
/// are forwarded to `dispatch_tx`. A lost broker connection is retried with an exponential
/// backoff and the subscription restored. Records published while disconnected are dropped.
/// The task ends once `publish_rx` or `dispatch_tx` is closed.
pub fn spawn_relay_task(
    address: String,
    channel: String,
    mut publish_rx: Receiver<ChannelMessage>,
    dispatch_tx: Sender<ChannelMessage>,
) -> JoinHandle<()> {
    let span = info_span!("relay", address = %address, channel = %channel);

    tokio::spawn(
        async move {
            let mut backoff = 1;

            loop {
                match relay(&address, &channel, &mut publish_rx, &dispatch_tx, &mut backoff).await {
                    Ok(()) => {
                        info!("Local chat traffic closed, stopping relay");
                        return;
                    }
                    Err(err) => {
                        error!(cause = %err, "Relay broker connection lost, retrying in {}s", backoff)
                    }
                }

                if !drop_records_for(Duration::from_secs(backoff), &mut publish_rx).await {
                    info!("Local chat traffic closed, stopping relay");
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            }
        }
        .instrument(span),
    )
}

/// Wait for `delay`, dropping every record published meanwhile so local sockets never block on
/// a disconnected relay. Returns `false` once `publish_rx` is closed.
async fn drop_records_for(delay: Duration, publish_rx: &mut Receiver<ChannelMessage>) -> bool {
    let retry = time::sleep(delay);
    tokio::pin!(retry);

    loop {
        tokio::select! {
            _ = &mut retry => return true,
            dropped = publish_rx.recv() => match dropped {
                Some(message) => warn!("Relay broker unreachable, dropping record for {}", message.channel),
                None => return false,
            }
        }
    }
}

async fn relay(
    address: &str,
    channel: &str,
    publish_rx: &mut Receiver<ChannelMessage>,
    dispatch_tx: &Sender<ChannelMessage>,
    backoff: &mut u64,
) -> relay_protocol::Result<()> {
    let mut subscriber = connect(address).await?;
    subscriber
        .write_message(&RelayRequest::Subscribe {
            channel: channel.to_string(),
        })
        .await?;

    match subscriber.read_message::<RelayResponse>().await? {
        Some(RelayResponse::Subscribed { .. }) => {}
        Some(other) => return Err(RelayError::UnexpectedResponse(other.kind().to_string())),
        None => return Err(RelayError::ConnectionReset),
    }

    let publisher = RelayClient::connect(address).await?;
    *backoff = 1;
    info!("Subscribed to relay channel");

    loop {
        tokio::select! {
            incoming = subscriber.read_message::<RelayResponse>() => {
                match incoming {
                    Ok(Some(RelayResponse::Message { channel, payload })) => {
                        if dispatch_tx.send(ChannelMessage { channel, payload }).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(Some(other)) => debug!("Ignoring {} frame on subscriber connection", other.kind()),
                    Ok(None) => return Err(RelayError::ConnectionReset),
                    Err(err) if err.is_recoverable() => warn!(cause = %err, "Dropping relay frame"),
                    Err(err) => return Err(err),
                }
            }
            outgoing = publish_rx.recv() => {
                match outgoing {
                    // A failed publication loses that record only, the subscriber connection tells
                    // whether the broker is gone
                    Some(message) => match publisher.publish(&message.channel, message.payload).await {
                        Ok(receivers) => debug!("Chat record delivered to {} subscribers", receivers),
                        Err(err) => warn!(cause = %err, "Unable to publish chat record, dropping it"),
                    },
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::{sleep, timeout};

    use relay_protocol::client::RelayClient;
    use relay_protocol::message::ChannelMessage;

    use super::spawn_relay_task;

    async fn start_broker(listener: TcpListener) -> oneshot::Sender<()> {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(relay_protocol::broker::run(listener, stop_rx, 16));
        stop_tx
    }

    /// Publish presence checks until `expected` relay tasks are subscribed.
    async fn wait_for_subscribers(address: &str, expected: u32) {
        timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(checker) = RelayClient::connect(address).await {
                    if let Ok(receivers) = checker.publish("chat", "presence".to_string()).await {
                        if receivers >= expected {
                            return;
                        }
                    }
                }
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("relay tasks never subscribed");
    }

    async fn next_chat(rx: &mut mpsc::Receiver<ChannelMessage>) -> ChannelMessage {
        timeout(Duration::from_secs(5), async {
            loop {
                let message = rx.recv().await.expect("dispatch channel closed");
                if message.payload != "presence" {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for a relayed message")
    }

    #[tokio::test]
    async fn records_reach_every_process_including_the_publisher() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _stop = start_broker(listener).await;

        let (publish_a, publish_rx_a) = mpsc::channel(32);
        let (dispatch_tx_a, mut dispatch_a) = mpsc::channel(32);
        let (_publish_b, publish_rx_b) = mpsc::channel(32);
        let (dispatch_tx_b, mut dispatch_b) = mpsc::channel(32);
        spawn_relay_task(address.clone(), "chat".to_string(), publish_rx_a, dispatch_tx_a);
        spawn_relay_task(address.clone(), "chat".to_string(), publish_rx_b, dispatch_tx_b);

        wait_for_subscribers(&address, 2).await;

        let record = ChannelMessage::new("chat", r#"{"action":"message","user":"alice","msg":"hi"}"#.to_string());
        publish_a.send(record.clone()).await.unwrap();

        assert_eq!(next_chat(&mut dispatch_a).await, record);
        assert_eq!(next_chat(&mut dispatch_b).await, record);
    }

    #[tokio::test]
    async fn subscription_is_restored_after_broker_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let stop = start_broker(listener).await;

        let (_publish, publish_rx) = mpsc::channel(32);
        let (dispatch_tx, mut dispatch) = mpsc::channel(32);
        spawn_relay_task(address.clone(), "chat".to_string(), publish_rx, dispatch_tx);
        wait_for_subscribers(&address, 1).await;

        stop.send(()).unwrap();
        sleep(Duration::from_millis(200)).await;
        let _restarted = start_broker(TcpListener::bind(&address).await.unwrap()).await;

        wait_for_subscribers(&address, 1).await;
        let checker = RelayClient::connect(&address).await.unwrap();
        checker
            .publish("chat", r#"{"action":"control","user":"bob","msg":" joined the channel"}"#.to_string())
            .await
            .unwrap();

        let message = next_chat(&mut dispatch).await;
        assert_eq!(message.channel, "chat");
    }

    #[tokio::test]
    async fn oversized_record_does_not_break_the_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _stop = start_broker(listener).await;

        let (publish, publish_rx) = mpsc::channel(32);
        let (dispatch_tx, mut dispatch) = mpsc::channel(32);
        spawn_relay_task(address.clone(), "chat".to_string(), publish_rx, dispatch_tx);
        wait_for_subscribers(&address, 1).await;

        let oversized = ChannelMessage::new("chat", "x".repeat(9 * 1024 * 1024));
        publish.send(oversized).await.unwrap();

        let record = ChannelMessage::new("chat", r#"{"action":"message","user":"bob","msg":"still here"}"#.to_string());
        publish.send(record.clone()).await.unwrap();

        assert_eq!(next_chat(&mut dispatch).await, record);
    }

    #[tokio::test]
    async fn records_are_dropped_while_the_broker_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let stop = start_broker(listener).await;

        let (publish, publish_rx) = mpsc::channel(32);
        let (dispatch_tx, mut dispatch) = mpsc::channel(32);
        spawn_relay_task(address.clone(), "chat".to_string(), publish_rx, dispatch_tx);
        wait_for_subscribers(&address, 1).await;

        stop.send(()).unwrap();
        sleep(Duration::from_millis(200)).await;

        // Far more records than the channel holds, none of them may block the publisher
        let stale = ChannelMessage::new("chat", r#"{"action":"message","user":"bob","msg":"stale"}"#.to_string());
        for _ in 0..100 {
            timeout(Duration::from_secs(2), publish.send(stale.clone()))
                .await
                .expect("publisher blocked while the broker is down")
                .unwrap();
        }
        sleep(Duration::from_millis(200)).await;

        let _restarted = start_broker(TcpListener::bind(&address).await.unwrap()).await;
        wait_for_subscribers(&address, 1).await;

        let fresh = ChannelMessage::new("chat", r#"{"action":"message","user":"bob","msg":"fresh"}"#.to_string());
        publish.send(fresh.clone()).await.unwrap();

        assert_eq!(next_chat(&mut dispatch).await, fresh);
    }

    #[tokio::test]
    async fn relay_stops_when_local_traffic_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _stop = start_broker(listener).await;

        let (publish, publish_rx) = mpsc::channel(32);
        let (dispatch_tx, _dispatch) = mpsc::channel(32);
        let relay = spawn_relay_task(address.clone(), "chat".to_string(), publish_rx, dispatch_tx);
        wait_for_subscribers(&address, 1).await;

        drop(publish);

        timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay task did not stop")
            .unwrap();
    }
}
