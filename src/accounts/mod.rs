use crate::state::AppState;
use axum::Router;

pub mod forms;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod validators;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::account_routes())
}
