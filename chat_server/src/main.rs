#[macro_use]
extern crate tracing;

use std::net::ToSocketAddrs;
use std::sync::Arc;

use eyre::eyre;
use tokio::signal;
use tokio::sync::mpsc;

use chat_database::settings::Settings;
use chat_database::store::{LocalSessionStore, RelaySessionStore, Store};
use chat_database::Database;
use chat_server::task::http::spawn_http_server;
use chat_server::task::relay::spawn_relay_task;
use chat_ws::{Broadcaster, ChatSender};
use relay_protocol::client::RelayClient;
use relay_protocol::message::ChannelMessage;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    chat_server::init_tracing();

    let settings = Settings::get()?;
    info!("Server: {}", settings.server_name());

    // Chat records produced by local websockets, consumed by the relay task
    let (publish_tx, publish_rx) = mpsc::channel::<ChannelMessage>(32);
    let broadcaster = Broadcaster::default();

    let (store, dispatcher, relay) = match settings.relay.address.clone() {
        Some(address) => {
            info!("Sharing sessions and chat traffic through relay broker {}", address);
            let client = RelayClient::connect(&address).await?;
            let store: Store = Arc::new(RelaySessionStore::new(client, settings.session.ttl_secs));

            // Messages delivered by the broker, consumed by the websocket dispatcher
            let (dispatch_tx, dispatch_rx) = mpsc::channel::<ChannelMessage>(32);
            let relay = spawn_relay_task(
                address,
                settings.relay.channel.clone(),
                publish_rx,
                dispatch_tx,
            );

            (store, broadcaster.dispatch_relay_message(dispatch_rx), Some(relay))
        }
        None => {
            info!("No relay broker configured, chat traffic stays in this process");
            let db = Database::open(&settings.session.db_path)?;
            let local = LocalSessionStore::new(db, settings.session.ttl_secs);
            let purged = local.purge_expired()?;
            debug!("Purged {} expired sessions", purged);
            let store: Store = Arc::new(local);

            // Loopback: every local record goes straight back to the local sockets
            (store, broadcaster.dispatch_relay_message(publish_rx), None)
        }
    };

    let address = settings
        .http_address()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| eyre!("Unable to resolve {}", settings.http_address()))?;

    let (_, server) = spawn_http_server(
        address,
        store,
        broadcaster,
        ChatSender::new(publish_tx, &settings.relay.channel),
        settings.http.cookie_name.clone(),
        async {
            if let Err(err) = signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal : {}", err);
            }
            info!("Shutting down");
        },
    )?;

    server.await?;

    // Websocket tasks may still hold publishers, stop the background tasks explicitly
    dispatcher.abort();
    if let Some(relay) = relay {
        relay.abort();
    }

    Ok(())
}
