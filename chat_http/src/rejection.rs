use warp::http::StatusCode;
use warp::{Rejection, Reply};

use chat_database::StoreError;

use crate::model::ErrorBody;

#[derive(Debug)]
pub(crate) struct StoreFailure(StoreError);

impl warp::reject::Reject for StoreFailure {}

pub(crate) fn store_failure(err: StoreError) -> Rejection {
    warp::reject::custom(StoreFailure(err))
}

/// Turn session store failures into a json `500`, other rejections keep warp's default handling.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    match err.find::<StoreFailure>() {
        Some(StoreFailure(cause)) => {
            error!("Session store failure : {}", cause);
            Ok(warp::reply::with_status(
                warp::reply::json(&ErrorBody::new(&cause.to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
        None => Err(err),
    }
}
