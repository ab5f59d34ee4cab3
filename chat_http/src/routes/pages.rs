use warp::{Filter, Rejection, Reply};

use chat_database::store::Store;

use crate::rejection::store_failure;
use crate::routes::{session_id, with_cookie, with_store, SessionCookie};

const INDEX_TEMPLATE: &str = include_str!("../../assets/index.html");
const CLIENT_SCRIPT: &str = include_str!("../../assets/client.js");

/// `GET /`, a fresh session id is issued on every page load.
pub fn index(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(session_id(cookie.clone()))
        .and(with_store(store))
        .and(with_cookie(cookie))
        .and_then(render_index)
}

pub fn client_script() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
{
    warp::path!("client.js")
        .and(warp::get())
        .map(|| warp::reply::with_header(CLIENT_SCRIPT, "content-type", "application/javascript"))
}

async fn render_index(
    session_id: Option<String>,
    store: Store,
    cookie: SessionCookie,
) -> Result<impl Reply, Rejection> {
    let session = store
        .regenerate(session_id.as_deref())
        .await
        .map_err(store_failure)?;

    debug!("Serving index for session {}", session.id);

    Ok(warp::reply::with_header(
        warp::reply::html(render(session.user.as_deref())),
        "set-cookie",
        cookie.set(&session.id),
    ))
}

/// Fill the page template, the login prompt is hidden once a name is known.
fn render(user: Option<&str>) -> String {
    let (ask_hidden, channel_hidden) = match user {
        Some(_) => ("hidden", ""),
        None => ("", "hidden"),
    };

    INDEX_TEMPLATE
        .replace("{{user}}", &escape_html(user.unwrap_or_default()))
        .replace("{{ask_hidden}}", ask_hidden)
        .replace("{{channel_hidden}}", channel_hidden)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
