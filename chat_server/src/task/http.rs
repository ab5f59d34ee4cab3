use std::future::Future;
use std::net::SocketAddr;

use tokio::task::JoinHandle;
use warp::Filter;

use chat_database::store::Store;
use chat_http::SessionCookie;
use chat_ws::{Broadcaster, ChatSender};

/// Bind the page and websocket routes on `address` and serve them until `shutdown` completes.
pub fn spawn_http_server(
    address: SocketAddr,
    store: Store,
    broadcaster: Broadcaster,
    sender: ChatSender,
    cookie_name: String,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<(SocketAddr, JoinHandle<()>)> {
    let http = chat_http::routes(store.clone(), SessionCookie::new(&cookie_name));
    let ws = chat_ws::routes(store, broadcaster, sender, cookie_name);

    let routes = http
        .or(ws)
        .recover(chat_http::handle_rejection)
        .with(warp::log("relaychat"));

    let (bound, server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(address, shutdown)?;

    info!("Chat server listening on {}", bound);
    Ok((bound, tokio::spawn(server)))
}
