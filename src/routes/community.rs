use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::community::{self, CommunityOverview};
use crate::db::models::ArticleSummary;
use crate::error::AppResult;
use crate::routes::articles::summaries;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExploreParams {
    pub topic: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/community", get(overview))
        .route("/community/explore", get(explore))
}

/// GET /community
pub async fn overview(State(state): State<AppState>) -> AppResult<Json<CommunityOverview>> {
    Ok(Json(community::overview(state.store.as_ref()).await?))
}

/// GET /community/explore?topic=
pub async fn explore(
    State(state): State<AppState>,
    Query(params): Query<ExploreParams>,
) -> AppResult<Json<Vec<ArticleSummary>>> {
    let articles = community::explore(state.store.as_ref(), params.topic.as_deref()).await?;
    Ok(Json(summaries(&articles)))
}
