use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use chat_database::entity::session::Session;
use chat_database::store::Store;

use crate::model::{ErrorBody, UserForm};
use crate::rejection::store_failure;
use crate::routes::{session_id, with_cookie, with_store, SessionCookie};

const MAX_FORM_LEN: u64 = 4 * 1024;

/// `POST /user`, store the display name in the session.
pub fn set_user(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("user")
        .and(warp::post())
        .and(session_id(cookie.clone()))
        .and(warp::body::content_length_limit(MAX_FORM_LEN))
        .and(warp::body::form())
        .and(with_store(store))
        .and(with_cookie(cookie))
        .and_then(save_user)
}

/// `GET /logout`, forget the session and go back to the login prompt.
pub fn logout(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("logout")
        .and(warp::get())
        .and(session_id(cookie.clone()))
        .and(with_store(store))
        .and(with_cookie(cookie))
        .and_then(destroy_session)
}

async fn save_user(
    session_id: Option<String>,
    form: UserForm,
    store: Store,
    cookie: SessionCookie,
) -> Result<Box<dyn Reply>, Rejection> {
    let user = form.user.trim();
    if user.is_empty() {
        return Ok(Box::new(warp::reply::with_status(
            warp::reply::json(&ErrorBody::new("user name is required")),
            StatusCode::BAD_REQUEST,
        )));
    }

    let existing = match session_id {
        Some(id) => store.load(&id).await.map_err(store_failure)?,
        None => None,
    };

    let created = existing.is_none();
    let mut session = existing.unwrap_or_else(|| Session::new(None));
    session.user = Some(user.to_string());
    store.save(&mut session).await.map_err(store_failure)?;

    info!("Session {} is now {}", session.id, user);

    let reply = warp::reply::json(&ErrorBody::none());
    if created {
        Ok(Box::new(warp::reply::with_header(
            reply,
            "set-cookie",
            cookie.set(&session.id),
        )))
    } else {
        Ok(Box::new(reply))
    }
}

async fn destroy_session(
    session_id: Option<String>,
    store: Store,
    cookie: SessionCookie,
) -> Result<impl Reply, Rejection> {
    if let Some(id) = session_id {
        store.destroy(&id).await.map_err(store_failure)?;
        debug!("Session {} destroyed", id);
    }

    let reply = warp::reply::with_header(warp::reply(), "location", "/");
    let reply = warp::reply::with_header(reply, "set-cookie", cookie.clear());
    Ok(warp::reply::with_status(reply, StatusCode::FOUND))
}
