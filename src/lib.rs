use crate::api::APIResponse;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::error::Error;

pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod dom;
pub mod error;
pub mod handler;
pub mod highlight;
pub mod markup;
pub mod model;
pub mod offsets;
pub mod range;
pub mod session;
pub mod store;

pub fn server_error(body: APIResponse) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

pub fn bad_request(body: APIResponse) -> Response {
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

/// All HTTP routes, without middleware.
pub fn app(state: handler::AppState) -> Router {
    Router::new()
        .route("/", get(handler::healthcheck))
        .route("/events", get(session::events))
        .nest("/pages", session::routes())
        .with_state(state)
}
