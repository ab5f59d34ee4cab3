#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use warp::http::StatusCode;
use warp::Filter;

use chat_database::entity::session::Session;
use chat_database::store::Store;
use relay_protocol::message::MAX_FRAME_LEN;

pub use broadcast::Broadcaster;
pub use event::{Action, ChatRecord};
pub use sender::ChatSender;

mod broadcast;
mod client;
pub mod event;
mod sender;

/// `GET /socket`, the realtime event channel. Upgrades are refused without a session cookie.
pub fn routes(
    store: Store,
    broadcaster: Broadcaster,
    sender: ChatSender,
    cookie_name: String,
) -> impl Filter<Extract = (Box<dyn warp::Reply>,), Error = warp::Rejection> + Clone {
    warp::path!("socket")
        .and(warp::ws())
        .and(warp::header::optional::<String>("cookie"))
        .map(move |ws: warp::ws::Ws, cookies: Option<String>| {
            let session_id = cookies
                .as_deref()
                .and_then(|header| Session::id_from_cookie_header(header, &cookie_name));

            match session_id {
                Some(session_id) => {
                    let store = store.clone();
                    let broadcaster = broadcaster.clone();
                    let sender = sender.clone();
                    // Chat records bigger than a relay frame are dropped anyway
                    let ws = ws.max_message_size(MAX_FRAME_LEN);
                    Box::new(ws.on_upgrade(move |socket| {
                        client::client_connected(socket, session_id, store, broadcaster, sender)
                    })) as Box<dyn warp::Reply>
                }
                None => {
                    warn!("Refusing websocket upgrade without a session cookie");
                    Box::new(warp::reply::with_status(
                        "missing session",
                        StatusCode::UNAUTHORIZED,
                    ))
                }
            }
        })
}
