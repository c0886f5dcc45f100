use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use futures_util::{Stream, stream};
use serde::{Deserialize, Serialize};

use super::{Command, Reply, open};
use crate::api::{APIResponse, PageQuery};
use crate::handler::AppState;
use crate::highlight::serialize;
use crate::markup;
use crate::model::HighlightRecord;
use crate::range::SelectionSpec;
use crate::{bad_request, server_error};

#[derive(Debug, Deserialize)]
pub struct OpenPage {
    pub url: String,
    pub markup: String,
}

#[derive(Debug, Deserialize)]
pub struct PageMessage {
    pub url: String,
    pub message: Command,
}

#[derive(Debug, Deserialize)]
pub struct PageSelection {
    pub url: String,
    pub selection: SelectionSpec,
}

#[derive(Debug, Serialize)]
pub struct PageHighlights {
    pub url: String,
    pub highlights: Vec<HighlightRecord>,
}

fn not_found(url: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(APIResponse::error(format!("no open page for {}", url))),
    )
        .into_response()
}

fn reply_response(reply: Reply) -> Response {
    match reply {
        Reply::Artifact(artifact) => {
            let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, artifact.mime.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                artifact.bytes,
            )
                .into_response()
        }
        Reply::Rejected(message) => bad_request(APIResponse::error(message)),
        Reply::Failed(message) => server_error(APIResponse::error(message)),
        reply => match reply.to_json() {
            Some(body) => (StatusCode::OK, Json(body)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
    }
}

/// Registers a loaded page. Reopening a URL replaces its session.
pub async fn open_page(State(state): State<AppState>, Json(payload): Json<OpenPage>) -> Response {
    let doc = match markup::parse(&payload.markup) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::info!(url = %payload.url, error = %e, "rejected page markup");
            return bad_request(APIResponse::error(e.to_string()));
        }
    };

    let session = open(&state.ctx, &payload.url, doc).await;
    let status = session.lock().await.status();
    state.sessions.write().await.insert(payload.url.clone(), session);

    tracing::info!(url = %payload.url, "page opened");
    (StatusCode::CREATED, Json(status)).into_response()
}

pub async fn close_page(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    match state.sessions.write().await.remove(&query.url) {
        Some(_) => {
            tracing::info!(url = %query.url, "page closed");
            (StatusCode::OK, Json(APIResponse::new_from_msg("closed"))).into_response()
        }
        None => not_found(&query.url),
    }
}

pub async fn send_message(State(state): State<AppState>, Json(payload): Json<PageMessage>) -> Response {
    let Some(session) = state.session(&payload.url).await else {
        return not_found(&payload.url);
    };
    let reply = session.lock().await.handle(payload.message).await;
    reply_response(reply)
}

pub async fn send_selection(
    State(state): State<AppState>,
    Json(payload): Json<PageSelection>,
) -> Response {
    let Some(session) = state.session(&payload.url).await else {
        return not_found(&payload.url);
    };
    let reply = session.lock().await.on_selection(payload.selection);
    reply_response(reply)
}

pub async fn get_markup(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    let Some(session) = state.session(&query.url).await else {
        return not_found(&query.url);
    };
    let markup = session.lock().await.markup();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        markup,
    )
        .into_response()
}

pub async fn get_highlights(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    let Some(session) = state.session(&query.url).await else {
        return not_found(&query.url);
    };
    let highlights = serialize(session.lock().await.document());
    (
        StatusCode::OK,
        Json(PageHighlights {
            url: query.url,
            highlights,
        }),
    )
        .into_response()
}

pub async fn remove_highlight(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let Some(session) = state.session(&query.url).await else {
        return not_found(&query.url);
    };
    let mut session = session.lock().await;
    match session.remove_highlight(&id) {
        Ok(true) => (StatusCode::OK, Json(session.status())).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(APIResponse::error(format!("no highlight {}", id))),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(id = %id, error = %e, "failed to remove highlight");
            server_error(APIResponse::error(e.to_string()))
        }
    }
}

/// Streams every page event as JSON until the client goes away.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.ctx.events.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event = Event::default()
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().comment("unencodable event"));
                    return Some((Ok(event), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream)
}
