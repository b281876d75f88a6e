use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::articles::{self, NewArticle, SearchParams};
use crate::db::models::{Article, ArticleSummary, Comment, PostDetail};
use crate::detail;
use crate::engagement::{self, Engagement, ToggleOutcome};
use crate::error::AppResult;
use crate::extractors::{CurrentSession, MaybeSession};
use crate::state::AppState;

/// Desired membership after the toggle; `liked` / `saved` read the same.
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    #[serde(alias = "liked", alias = "saved")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewComment {
    pub text: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/articles", post(create))
        .route("/articles/today", get(today))
        .route("/articles/search", get(search))
        .route("/articles/{id}", get(show))
        .route("/articles/{id}/like", post(like))
        .route("/articles/{id}/save", post(save))
        .route("/articles/{id}/comments", post(comment))
}

pub(crate) fn summaries(articles: &[Article]) -> Vec<ArticleSummary> {
    articles.iter().map(ArticleSummary::from).collect()
}

/// GET /articles/today
pub async fn today(State(state): State<AppState>) -> AppResult<Json<Vec<ArticleSummary>>> {
    let articles = articles::list_today(state.store.as_ref()).await?;
    Ok(Json(summaries(&articles)))
}

/// GET /articles/search?keyword=&from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Vec<ArticleSummary>>> {
    let articles = articles::search(state.store.as_ref(), &params).await?;
    Ok(Json(summaries(&articles)))
}

/// POST /articles
pub async fn create(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<NewArticle>,
) -> AppResult<(StatusCode, Json<Article>)> {
    let article = articles::create_article(state.store.as_ref(), &session.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(article)))
}

/// GET /articles/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
    viewer: MaybeSession,
) -> AppResult<Json<PostDetail>> {
    let post = detail::fetch_post_detail(state.store.as_ref(), &id, viewer.user_id()).await?;
    Ok(Json(post))
}

async fn toggle(
    state: &AppState,
    kind: Engagement,
    user_id: &str,
    article_id: &str,
    desired: bool,
) -> AppResult<Json<ToggleOutcome>> {
    let outcome =
        engagement::apply_toggle(state.store.as_ref(), kind, user_id, article_id, desired).await?;
    Ok(Json(outcome))
}

/// POST /articles/{id}/like
pub async fn like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<ToggleRequest>,
) -> AppResult<Json<ToggleOutcome>> {
    toggle(&state, Engagement::Like, &session.user_id, &id, body.active).await
}

/// POST /articles/{id}/save
pub async fn save(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<ToggleRequest>,
) -> AppResult<Json<ToggleOutcome>> {
    toggle(&state, Engagement::Save, &session.user_id, &id, body.active).await
}

/// POST /articles/{id}/comments
pub async fn comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentSession(session): CurrentSession,
    Json(body): Json<NewComment>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment =
        articles::create_comment(state.store.as_ref(), &id, &session.user_id, &body.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
