use axum::{
    Router,
    routing::{delete, get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handler::open_page))
        .route("/", delete(handler::close_page))
        .route("/message", post(handler::send_message))
        .route("/selection", post(handler::send_selection))
        .route("/markup", get(handler::get_markup))
        .route("/highlights", get(handler::get_highlights))
        .route("/highlights/:id", delete(handler::remove_highlight))
}
