use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::LOCATION, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::session_key_from_headers;
use crate::{accounts::repo_types::Account, error::AppError, state::AppState};

/// An active account reached through a live session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub account: Account,
}

/// Resolves the `sessionid` cookie to an active account, if any.
///
/// Missing, unknown and expired sessions all yield `None`; only storage
/// failures reject the request.
pub struct CurrentUser(pub Option<AuthenticatedUser>);

impl CurrentUser {
    pub fn account(&self) -> Option<&Account> {
        self.0.as_ref().map(|u| &u.account)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = session_key_from_headers(&parts.headers) else {
            return Ok(CurrentUser(None));
        };
        let Some(session) = state.sessions.lookup(&key).await? else {
            debug!("session cookie does not name a live session");
            return Ok(CurrentUser(None));
        };
        let account = match state.accounts.find_by_id(session.account_id).await? {
            Some(account) if account.is_active => account,
            Some(_) => {
                warn!(account_id = %session.account_id, "session bound to inactive account");
                return Ok(CurrentUser(None));
            }
            None => return Ok(CurrentUser(None)),
        };
        Ok(CurrentUser(Some(AuthenticatedUser { account })))
    }
}

/// Like [`CurrentUser`] but sends anonymous visitors to the login page,
/// carrying the requested path in `next`.
pub struct LoginRequired(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for LoginRequired {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        match user {
            Some(user) => Ok(LoginRequired(user)),
            None => Err(login_redirect(&state.config.redirects.login_url, parts.uri.path())),
        }
    }
}

fn login_redirect(login_url: &str, path: &str) -> Response {
    // Slashes stay unescaped.
    let next = url::form_urlencoded::byte_serialize(path.as_bytes())
        .collect::<String>()
        .replace("%2F", "/");
    let location = format!("{login_url}?next={next}");
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(e) => AppError::Internal(anyhow::anyhow!("login redirect header: {e}")).into_response(),
    }
}
