use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::articles::{self, ProfileUpdate};
use crate::db::models::{ArticleSummary, User};
use crate::error::AppResult;
use crate::extractors::{CurrentSession, MaybeSession};
use crate::routes::articles::summaries;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me).patch(update_me))
        .route("/users/me/liked", get(liked))
        .route("/users/me/saved", get(saved))
        .route("/users/{id}/articles", get(by_author))
}

/// GET /users/me
pub async fn me(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<User>> {
    Ok(Json(
        articles::get_user(state.store.as_ref(), &session.user_id).await?,
    ))
}

/// PATCH /users/me
pub async fn update_me(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<ProfileUpdate>,
) -> AppResult<Json<User>> {
    let user = articles::update_profile(state.store.as_ref(), &session.user_id, body).await?;
    Ok(Json(user))
}

/// GET /users/me/liked
pub async fn liked(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<Vec<ArticleSummary>>> {
    let user = articles::get_user(state.store.as_ref(), &session.user_id).await?;
    let articles = articles::liked_articles(state.store.as_ref(), &user).await;
    Ok(Json(summaries(&articles)))
}

/// GET /users/me/saved
pub async fn saved(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AppResult<Json<Vec<ArticleSummary>>> {
    let user = articles::get_user(state.store.as_ref(), &session.user_id).await?;
    let articles = articles::saved_articles(state.store.as_ref(), &user).await;
    Ok(Json(summaries(&articles)))
}

/// GET /users/{id}/articles
pub async fn by_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
    viewer: MaybeSession,
) -> AppResult<Json<Vec<ArticleSummary>>> {
    let own = viewer.user_id() == Some(id.as_str());
    let articles = articles::articles_by_author(state.store.as_ref(), &id, own).await?;
    Ok(Json(summaries(&articles)))
}
