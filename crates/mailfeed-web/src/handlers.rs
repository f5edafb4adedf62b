//! Web UI Handlers
//!
//! Request handlers for the web UI.

use crate::error::WebError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Form,
};
use mailfeed_common::Error;
use mailfeed_core::service::MAX_NAME_LENGTH;
use serde::Deserialize;

/// Health check handler
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// Inbox creation form
pub async fn index(State(state): State<AppState>) -> Result<Response, WebError> {
    render_index(&state, StatusCode::OK, "", None)
}

fn render_index(
    state: &AppState,
    status: StatusCode,
    name: &str,
    error: Option<String>,
) -> Result<Response, WebError> {
    let context = serde_json::json!({
        "title": "Create inbox",
        "service_name": state.service.service_name(),
        "home_url": state.service.links().home_url(),
        "max_name_length": MAX_NAME_LENGTH,
        "name": name,
        "error": error,
    });

    let html = state.templates.render("index.html", &context)?;
    Ok((status, Html(html)).into_response())
}

/// Inbox creation form data
#[derive(Deserialize)]
pub struct CreateInboxForm {
    #[serde(default)]
    pub name: String,
}

/// Inbox creation form submission
pub async fn create_inbox(
    State(state): State<AppState>,
    Form(form): Form<CreateInboxForm>,
) -> Result<Response, WebError> {
    let inbox = match state.service.create_inbox(&form.name).await {
        Ok(inbox) => inbox,
        Err(Error::Validation(message)) => {
            return render_index(&state, StatusCode::UNPROCESSABLE_ENTITY, &form.name, Some(message));
        }
        Err(e) => return Err(e.into()),
    };

    let links = state.service.links();
    let context = serde_json::json!({
        "title": "Inbox created",
        "service_name": state.service.service_name(),
        "home_url": links.home_url(),
        "name": inbox.name,
        "address": links.address(&inbox.token),
        "feed_url": links.feed_url(&inbox.token),
    });

    let html = state.templates.render("created.html", &context)?;
    Ok(Html(html).into_response())
}

/// Atom feed of an inbox, at `/feeds/<token>.xml`
pub async fn feed(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, WebError> {
    let Some(token) = file.strip_suffix(".xml") else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    match state.service.feed_xml(token).await? {
        Some(xml) => Ok((
            [(header::CONTENT_TYPE, "application/atom+xml; charset=utf-8")],
            xml,
        )
            .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}
