#[macro_use]
extern crate log;

use warp::Filter;

use chat_database::store::Store;

pub use rejection::handle_rejection;
pub use routes::SessionCookie;

use crate::routes::{pages_routes, user_routes};

mod model;
mod rejection;
mod routes;

/// Page, login and logout routes. Store failures surface as rejections, recover them with
/// [`handle_rejection`] once every route is combined.
pub fn routes(
    store: Store,
    cookie: SessionCookie,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    pages_routes(store.clone(), cookie.clone()).or(user_routes(store, cookie))
}
