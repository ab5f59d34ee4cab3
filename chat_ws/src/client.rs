use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::WebSocket;

use chat_database::store::Store;

use crate::broadcast::Broadcaster;
use crate::event::{ChatRecord, ClientEvent};
use crate::sender::ChatSender;

/// State of one browser socket.
struct Client {
    id: usize,
    session_id: String,
    store: Store,
    sender: ChatSender,
    /// Last display name read from the session
    user: Option<String>,
    /// Name announced by the last `join`, used for the leave notice
    joined_as: Option<String>,
}

pub(crate) async fn client_connected(
    ws: WebSocket,
    session_id: String,
    store: Store,
    broadcaster: Broadcaster,
    sender: ChatSender,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Frames for this socket are queued here and written by a dedicated task
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            if let Err(err) = ws_tx.send(message).await {
                debug!("Websocket send error : {}", err);
                break;
            }
        }
    });

    let id = broadcaster.register(tx);
    info!("Websocket client {} connected", id);

    let mut client = Client {
        id,
        session_id,
        store,
        sender,
        user: None,
        joined_as: None,
    };
    // Resolved once at upgrade, later page loads may regenerate the session
    client.current_user().await;

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!("Websocket error on client {} : {}", id, err);
                break;
            }
        };

        if message.is_close() {
            break;
        }

        // Binary, ping and pong frames carry no events
        if let Ok(text) = message.to_str() {
            client.on_text(text).await;
        }
    }

    broadcaster.unregister(id);
    info!("Websocket client {} disconnected", id);
    client.on_disconnect().await;
}

impl Client {
    async fn on_text(&mut self, text: &str) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(err) => {
                warn!("Dropping event from client {} : {}", self.id, err);
                return;
            }
        };

        let user = match self.current_user().await {
            Some(user) => user,
            None => {
                warn!(
                    "Dropping {} event from client {} : session has no user",
                    event.kind(),
                    self.id
                );
                return;
            }
        };

        match event {
            ClientEvent::Join => {
                self.sender.publish(&ChatRecord::joined(&user)).await;
                self.joined_as = Some(user);
            }
            ClientEvent::Chat { msg } => {
                if msg.trim().is_empty() {
                    debug!("Dropping empty chat message from client {}", self.id);
                    return;
                }
                self.sender.publish(&ChatRecord::message(&user, &msg)).await;
            }
        }
    }

    /// The display name is read at event time so a rename is picked up without reconnecting.
    /// Once the session is gone, regenerated by another page load or destroyed, the socket keeps
    /// the name it last saw.
    async fn current_user(&mut self) -> Option<String> {
        match self.store.load(&self.session_id).await {
            Ok(Some(session)) => self.user = session.user,
            Ok(None) => debug!(
                "Session of client {} is gone, keeping user {:?}",
                self.id, self.user
            ),
            Err(err) => error!("Unable to load session for client {} : {}", self.id, err),
        }

        self.user.clone()
    }

    async fn on_disconnect(self) {
        if let Some(user) = self.joined_as {
            self.sender.publish(&ChatRecord::left(&user)).await;
        }
    }
}
