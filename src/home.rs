use axum::{extract::State, response::Html, routing::get, Router};
use tracing::instrument;

use crate::{
    accounts::handlers::page_context, error::AppError, sessions::extractors::CurrentUser,
    state::AppState, templates,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(home))
}

/// Landing page; anonymous visitors see it too.
#[instrument(skip_all)]
pub async fn home(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Html<String>, AppError> {
    let ctx = page_context(current.account());
    templates::render(&state.templates, templates::HOME, &ctx)
}
