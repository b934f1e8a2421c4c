use anyhow::Context as _;
use axum::{
    extract::{Path, Query, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_json::json;
use tera::Context;
use tracing::{debug, instrument};

use super::{
    forms::{safe_next, FormErrors, LoginForm, SignupForm, INVALID_LOGIN, NON_FIELD_ERRORS},
    repo_types::Account,
    services::{self, SignupOutcome},
};
use crate::{
    error::AppError,
    sessions::{
        clear_session_cookie,
        extractors::{CurrentUser, LoginRequired},
        session_cookie, session_key_from_headers,
    },
    state::AppState,
    templates,
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/signup/", get(signup_page).post(signup_submit))
        .route("/login/", get(login_page).post(login_submit))
        .route("/logout/", post(logout_submit))
        // Static paths above win over this capture.
        .route("/:username/", get(user_profile))
}

// --- pages ---

#[instrument(skip_all)]
pub async fn signup_page(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Html<String>, AppError> {
    render_signup(&state, current.account(), &SignupForm::default(), &FormErrors::default())
}

#[instrument(skip_all)]
pub async fn signup_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    let previous = session_key_from_headers(&headers);
    match services::signup(&state, &form, previous.as_ref()).await? {
        SignupOutcome::Created { session, .. } => {
            let cookie = session_cookie(&session.key, &state.config.session)
                .context("build session cookie")?;
            redirect_found(&state.config.redirects.after_signup, Some(cookie))
        }
        SignupOutcome::Invalid(errors) => {
            Ok(render_signup(&state, current.account(), &form, &errors)?.into_response())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[instrument(skip_all)]
pub async fn login_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<NextQuery>,
) -> Result<Html<String>, AppError> {
    let form = LoginForm {
        next: query.next,
        ..Default::default()
    };
    render_login(&state, current.account(), &form, &FormErrors::default())
}

#[instrument(skip_all)]
pub async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    current: CurrentUser,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let mut errors = form.validate();
    if !errors.is_empty() {
        return Ok(render_login(&state, current.account(), &form, &errors)?.into_response());
    }

    let username = form.username();
    let Some(account) = services::authenticate(&state, &username, &form.password).await? else {
        debug!(%username, "credentials rejected");
        errors.add(NON_FIELD_ERRORS, INVALID_LOGIN);
        return Ok(render_login(&state, current.account(), &form, &errors)?.into_response());
    };

    let previous = session_key_from_headers(&headers);
    let session = services::login(&state, &account, previous.as_ref()).await?;
    let cookie = session_cookie(&session.key, &state.config.session)
        .context("build session cookie")?;
    let target = safe_next(form.next.as_deref())
        .unwrap_or(state.config.redirects.after_login.as_str());
    redirect_found(target, Some(cookie))
}

#[instrument(skip_all)]
pub async fn logout_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = session_key_from_headers(&headers);
    services::logout(&state, key.as_ref()).await?;
    let cookie = clear_session_cookie(&state.config.session).context("build clearing cookie")?;
    redirect_found(&state.config.redirects.after_logout, Some(cookie))
}

/// Shows the path value as given; no account lookup is made for it.
#[instrument(skip_all)]
pub async fn user_profile(
    State(state): State<AppState>,
    LoginRequired(user): LoginRequired,
    Path(username): Path<String>,
) -> Result<Html<String>, AppError> {
    let mut ctx = page_context(Some(&user.account));
    ctx.insert("username", &username);
    templates::render(&state.templates, templates::USER_PROFILE, &ctx)
}

// --- helpers ---

/// Base context every page extends: the signed-in account, or null.
pub(crate) fn page_context(user: Option<&Account>) -> Context {
    let mut ctx = Context::new();
    ctx.insert("user", &user);
    ctx
}

fn insert_errors(ctx: &mut Context, errors: &FormErrors) {
    ctx.insert("errors", errors);
    ctx.insert("non_field_errors", errors.non_field());
}

// Passwords are never echoed back into the page.
fn render_signup(
    state: &AppState,
    user: Option<&Account>,
    form: &SignupForm,
    errors: &FormErrors,
) -> Result<Html<String>, AppError> {
    let mut ctx = page_context(user);
    ctx.insert("form", &json!({ "username": form.username, "email": form.email }));
    insert_errors(&mut ctx, errors);
    templates::render(&state.templates, templates::SIGNUP, &ctx)
}

fn render_login(
    state: &AppState,
    user: Option<&Account>,
    form: &LoginForm,
    errors: &FormErrors,
) -> Result<Html<String>, AppError> {
    let mut ctx = page_context(user);
    ctx.insert("form", &json!({ "username": form.username }));
    ctx.insert("next", &form.next);
    insert_errors(&mut ctx, errors);
    templates::render(&state.templates, templates::LOGIN, &ctx)
}

/// 302 with an optional `Set-Cookie`.
fn redirect_found(location: &str, cookie: Option<HeaderValue>) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location).context("redirect location")?;
    let mut res = (StatusCode::FOUND, [(LOCATION, location)]).into_response();
    if let Some(cookie) = cookie {
        res.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(res)
}
