use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::SignedIn;
use crate::error::AppResult;
use crate::extractors::{CurrentSession, MaybeSession};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub signed_in: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedInBody {
    user_id: String,
    token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session))
        .route("/auth/password", post(change_password))
}

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name,
        token,
        max_age_hours * 3600
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

fn signed_in_response(state: &AppState, status: StatusCode, signed_in: SignedIn) -> Response {
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &signed_in.token,
        state.config.auth.session_hours,
    );
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(SignedInBody {
            user_id: signed_in.user_id,
            token: signed_in.token,
        }),
    )
        .into_response()
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> AppResult<Response> {
    let signed_in = state
        .accounts
        .register(state.store.as_ref(), &body.email, &body.password)
        .await?;
    Ok(signed_in_response(&state, StatusCode::CREATED, signed_in))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> AppResult<Response> {
    let signed_in = state.accounts.sign_in(&body.email, &body.password)?;
    tracing::info!("User {} signed in", signed_in.user_id);
    Ok(signed_in_response(&state, StatusCode::OK, signed_in))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Response> {
    state.accounts.sign_out(&session.token)?;
    Ok((
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
    )
        .into_response())
}

/// GET /auth/session
pub async fn session(session: MaybeSession) -> Json<SessionBody> {
    let user_id = session.user_id().map(str::to_string);
    Json(SessionBody {
        signed_in: user_id.is_some(),
        user_id,
    })
}

/// POST /auth/password
pub async fn change_password(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<PasswordChange>,
) -> AppResult<StatusCode> {
    state.accounts.change_password(
        &session.user_id,
        &body.old_password,
        &body.new_password,
        &session.token,
    )?;
    Ok(StatusCode::NO_CONTENT)
}
