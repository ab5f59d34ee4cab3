use std::sync::Arc;

use warp::Filter;

use chat_database::entity::session::Session;
use chat_database::store::Store;

pub(crate) mod pages;
pub(crate) mod user;

/// Name and attributes of the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: Arc<str>,
}

impl SessionCookie {
    pub fn new(name: &str) -> Self {
        SessionCookie { name: name.into() }
    }

    pub(crate) fn set(&self, session_id: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.name, session_id
        )
    }

    pub(crate) fn clear(&self) -> String {
        format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", self.name)
    }
}

/// Session identifier carried by the request cookie, if any.
pub(crate) fn session_id(
    cookie: SessionCookie,
) -> impl Filter<Extract = (Option<String>,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("cookie").map(move |header: Option<String>| {
        header.and_then(|header| Session::id_from_cookie_header(&header, &cookie.name))
    })
}

pub(crate) fn with_store(
    store: Store,
) -> impl Filter<Extract = (Store,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub(crate) fn with_cookie(
    cookie: SessionCookie,
) -> impl Filter<Extract = (SessionCookie,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || cookie.clone())
}

pub(crate) fn pages_routes(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    pages::index(store, cookie).or(pages::client_script())
}

pub(crate) fn user_routes(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    user::set_user(store.clone(), cookie.clone()).or(user::logout(store, cookie))
}
