use std::collections::HashMap;

use serde::Serialize;

use crate::db::models::{Article, ArticleSummary};
use crate::store::{self, Direction, DocumentStore, Query, StoreError};

pub const TOP_POSTS: usize = 5;
pub const TOP_TOPICS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityOverview {
    pub popular: Vec<ArticleSummary>,
    pub topics: Vec<TopicCount>,
}

/// Most liked posts and most used topics across all visible articles.
pub async fn overview(store: &dyn DocumentStore) -> Result<CommunityOverview, StoreError> {
    let query = Query::new()
        .eq("visible", true)
        .order_by("createdAt", Direction::Descending);
    let articles: Vec<Article> = store::query_all(store, &query).await?;

    Ok(CommunityOverview {
        popular: popular(&articles, TOP_POSTS),
        topics: top_topics(&articles, TOP_TOPICS),
    })
}

/// Visible articles, newest first, optionally narrowed to one topic.
pub async fn explore(
    store: &dyn DocumentStore,
    topic: Option<&str>,
) -> Result<Vec<Article>, StoreError> {
    let mut query = Query::new()
        .eq("visible", true)
        .order_by("createdAt", Direction::Descending);
    if let Some(topic) = topic.map(str::trim).filter(|t| !t.is_empty()) {
        query = query.array_contains("topics", topic);
    }
    store::query_all(store, &query).await
}

fn popular(articles: &[Article], n: usize) -> Vec<ArticleSummary> {
    let mut ranked: Vec<&Article> = articles.iter().collect();
    ranked.sort_by(|a, b| {
        b.like_count
            .cmp(&a.like_count)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    ranked.into_iter().take(n).map(ArticleSummary::from).collect()
}

fn top_topics(articles: &[Article], n: usize) -> Vec<TopicCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for article in articles {
        for topic in &article.topics {
            *counts.entry(topic.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<TopicCount> = counts
        .into_iter()
        .map(|(name, count)| TopicCount {
            name: name.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(n);
    ranked
}
