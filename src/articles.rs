// Articles, comments and profiles - everything the journal screens read and write
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map};
use thiserror::Error;

use crate::db::models::{Article, Comment, User, USERS};
use crate::detail;
use crate::store::{self, Direction, DocumentStore, FilterOp, Query, StoreError};

pub const MAX_TITLE_LEN: usize = 120;
pub const MAX_TEXT_LEN: usize = 10_000;
pub const MAX_COMMENT_LEN: usize = 500;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum ArticleError {
    #[error("{0}")]
    Validation(String),

    #[error("Article not found: {0}")]
    NotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// Search filters. Dates are inclusive calendar days in UTC.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub keyword: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn create_article(
    store: &dyn DocumentStore,
    author_id: &str,
    new: NewArticle,
) -> Result<Article, ArticleError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(ArticleError::Validation("Title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ArticleError::Validation(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    if new.text.chars().count() > MAX_TEXT_LEN {
        return Err(ArticleError::Validation(format!(
            "Text must be at most {} characters",
            MAX_TEXT_LEN
        )));
    }

    let article = Article {
        id: uuid::Uuid::now_v7().to_string(),
        author_id: author_id.to_string(),
        title: title.to_string(),
        text: new.text,
        image: new.image.map(|s| s.trim().to_string()).unwrap_or_default(),
        emotions: normalize_tags(new.emotions),
        topics: normalize_tags(new.topics),
        like_count: 0,
        saved_count: 0,
        created_at: Utc::now(),
        visible: true,
    };

    store::put(store, &article).await?;
    tracing::info!("Article {} created by {}", article.id, author_id);
    Ok(article)
}

/// Trim, drop blanks, dedupe keeping first occurrence.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub async fn get_article(store: &dyn DocumentStore, id: &str) -> Result<Article, ArticleError> {
    store::fetch(store, id)
        .await?
        .ok_or_else(|| ArticleError::NotFound(id.to_string()))
}

pub async fn get_user(store: &dyn DocumentStore, id: &str) -> Result<User, ArticleError> {
    store::fetch(store, id)
        .await?
        .ok_or_else(|| ArticleError::UserNotFound(id.to_string()))
}

pub async fn update_profile(
    store: &dyn DocumentStore,
    user_id: &str,
    update: ProfileUpdate,
) -> Result<User, ArticleError> {
    let mut fields = Map::new();

    if let Some(name) = update.display_name {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(ArticleError::Validation(format!(
                "Display name must be 1-{} characters",
                MAX_DISPLAY_NAME_LEN
            )));
        }
        fields.insert("displayName".into(), json!(name));
    }
    if let Some(avatar) = update.avatar {
        fields.insert("avatar".into(), json!(avatar.trim()));
    }

    if !fields.is_empty() {
        store
            .update(USERS, user_id, fields)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => ArticleError::UserNotFound(user_id.to_string()),
                other => other.into(),
            })?;
    }

    get_user(store, user_id).await
}

/// Visible articles written since UTC midnight, newest first.
pub async fn list_today(store: &dyn DocumentStore) -> Result<Vec<Article>, ArticleError> {
    let midnight = start_of_day(Utc::now().date_naive());
    let query = visible()
        .filter("createdAt", FilterOp::Gte, midnight.timestamp_millis())
        .order_by("createdAt", Direction::Descending);
    Ok(store::query_all(store, &query).await?)
}

pub async fn search(
    store: &dyn DocumentStore,
    params: &SearchParams,
) -> Result<Vec<Article>, ArticleError> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(ArticleError::Validation(
                "Start date must not be after end date".into(),
            ));
        }
    }

    let mut query = visible().order_by("createdAt", Direction::Descending);
    if let Some(from) = params.from {
        query = query.filter("createdAt", FilterOp::Gte, start_of_day(from).timestamp_millis());
    }
    if let Some(to) = params.to {
        let end = start_of_day(to) + Duration::days(1) - Duration::milliseconds(1);
        query = query.filter("createdAt", FilterOp::Lte, end.timestamp_millis());
    }

    let articles: Vec<Article> = store::query_all(store, &query).await?;

    let keyword = params
        .keyword
        .as_deref()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());

    Ok(match keyword {
        Some(keyword) => articles
            .into_iter()
            .filter(|a| {
                a.title.to_lowercase().contains(&keyword)
                    || a.text.to_lowercase().contains(&keyword)
            })
            .collect(),
        None => articles,
    })
}

/// Articles written by `user_id`, newest first. Hidden ones only for their author.
pub async fn articles_by_author(
    store: &dyn DocumentStore,
    user_id: &str,
    include_hidden: bool,
) -> Result<Vec<Article>, ArticleError> {
    let query = Query::new()
        .eq("authorId", user_id)
        .order_by("createdAt", Direction::Descending);
    let articles: Vec<Article> = store::query_all(store, &query).await?;
    Ok(articles
        .into_iter()
        .filter(|a| include_hidden || a.visible)
        .collect())
}

pub async fn liked_articles(store: &dyn DocumentStore, user: &User) -> Vec<Article> {
    resolve_articles(store, &user.liked_article_ids).await
}

pub async fn saved_articles(store: &dyn DocumentStore, user: &User) -> Vec<Article> {
    resolve_articles(store, &user.saved_article_ids).await
}

/// Fetch ids a few at a time, keeping input order and dropping dangling ids.
async fn resolve_articles(store: &dyn DocumentStore, ids: &[String]) -> Vec<Article> {
    let results: Vec<_> = stream::iter(
        ids.iter()
            .map(|id| store::fetch::<Article>(store, id))
            .collect::<Vec<_>>(),
    )
    .buffered(store::READ_FAN_OUT)
    .collect()
    .await;

    ids.iter()
        .zip(results)
        .filter_map(|(id, result)| match result {
            Ok(Some(article)) => Some(article),
            Ok(None) => {
                tracing::info!("Dropping reference to deleted article {}", id);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to load article {}: {}", id, e);
                None
            }
        })
        .collect()
}

pub async fn create_comment(
    store: &dyn DocumentStore,
    article_id: &str,
    author_id: &str,
    text: &str,
) -> Result<Comment, ArticleError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ArticleError::Validation("Comment cannot be empty".into()));
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(ArticleError::Validation(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LEN
        )));
    }

    get_article(store, article_id).await?;

    let comment = Comment {
        id: uuid::Uuid::now_v7().to_string(),
        article_id: article_id.to_string(),
        author_id: author_id.to_string(),
        text: text.to_string(),
        created_at: Utc::now(),
    };
    store::put(store, &comment).await?;
    Ok(comment)
}

pub async fn comments_for(
    store: &dyn DocumentStore,
    article_id: &str,
) -> Result<Vec<Comment>, ArticleError> {
    Ok(detail::comments_for(store, article_id).await?)
}

fn visible() -> Query {
    Query::new().eq("visible", true)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::SqliteDocumentStore;
    use tempfile::TempDir;

    fn setup() -> (SqliteDocumentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (SqliteDocumentStore::new(pool), temp_dir)
    }

    fn draft(title: &str, text: &str) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    async fn backdate(store: &SqliteDocumentStore, article: &Article, when: DateTime<Utc>) {
        let mut article = article.clone();
        article.created_at = when;
        store::put(store, &article).await.unwrap();
    }

    #[tokio::test]
    async fn create_article_validates_and_normalizes() {
        let (store, _tmp) = setup();

        let err = create_article(&store, "u1", draft("   ", "x")).await;
        assert!(matches!(err, Err(ArticleError::Validation(_))));

        let article = create_article(
            &store,
            "u1",
            NewArticle {
                title: "  Ocean  ".into(),
                text: "Deep water".into(),
                image: None,
                emotions: vec!["calm".into(), " calm ".into(), "".into()],
                topics: vec!["water".into()],
            },
        )
        .await
        .unwrap();

        assert_eq!(article.title, "Ocean");
        assert_eq!(article.emotions, vec!["calm"]);
        assert_eq!(article.like_count, 0);
        assert!(article.visible);

        let stored = get_article(&store, &article.id).await.unwrap();
        assert_eq!(stored, article_with_millis(&article));
    }

    fn article_with_millis(article: &Article) -> Article {
        let mut a = article.clone();
        a.created_at =
            DateTime::from_timestamp_millis(article.created_at.timestamp_millis()).unwrap();
        a
    }

    #[tokio::test]
    async fn today_excludes_older_and_hidden_articles() {
        let (store, _tmp) = setup();
        let fresh = create_article(&store, "u1", draft("Fresh", "")).await.unwrap();
        let old = create_article(&store, "u1", draft("Old", "")).await.unwrap();
        backdate(&store, &old, Utc::now() - Duration::days(2)).await;

        let mut hidden = create_article(&store, "u1", draft("Hidden", "")).await.unwrap();
        hidden.visible = false;
        store::put(&store, &hidden).await.unwrap();

        let today = list_today(&store).await.unwrap();
        let ids: Vec<_> = today.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![fresh.id]);
    }

    #[tokio::test]
    async fn search_by_keyword_and_date_range() {
        let (store, _tmp) = setup();
        let a = create_article(&store, "u1", draft("Flying high", "")).await.unwrap();
        let b = create_article(&store, "u1", draft("Teeth", "I was FLYING too")).await.unwrap();
        let c = create_article(&store, "u1", draft("Exam", "")).await.unwrap();

        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        backdate(&store, &a, start_of_day(day(1)) + Duration::hours(8)).await;
        backdate(&store, &b, start_of_day(day(5)) + Duration::hours(23)).await;
        backdate(&store, &c, start_of_day(day(9))).await;

        let hits = search(
            &store,
            &SearchParams {
                keyword: Some("flying".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let ids: Vec<_> = hits.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);

        let ranged = search(
            &store,
            &SearchParams {
                keyword: None,
                from: Some(day(2)),
                to: Some(day(5)),
            },
        )
        .await
        .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].id, b.id);

        let inverted = search(
            &store,
            &SearchParams {
                keyword: None,
                from: Some(day(5)),
                to: Some(day(2)),
            },
        )
        .await;
        assert!(matches!(inverted, Err(ArticleError::Validation(_))));
    }

    #[tokio::test]
    async fn liked_articles_drop_deleted_ids_and_keep_order() {
        let (store, _tmp) = setup();
        let a = create_article(&store, "u1", draft("A", "")).await.unwrap();
        let b = create_article(&store, "u1", draft("B", "")).await.unwrap();

        let mut user = User::new("u2", "Reader");
        user.liked_article_ids = vec![b.id.clone(), "gone".into(), a.id.clone()];

        let liked = liked_articles(&store, &user).await;
        let ids: Vec<_> = liked.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert!(saved_articles(&store, &user).await.is_empty());
    }

    #[tokio::test]
    async fn comments_are_trimmed_bounded_and_ordered() {
        let (store, _tmp) = setup();
        let article = create_article(&store, "u1", draft("A", "")).await.unwrap();

        assert!(matches!(
            create_comment(&store, &article.id, "u2", "   ").await,
            Err(ArticleError::Validation(_))
        ));
        assert!(matches!(
            create_comment(&store, &article.id, "u2", &"x".repeat(501)).await,
            Err(ArticleError::Validation(_))
        ));
        assert!(matches!(
            create_comment(&store, "missing", "u2", "hi").await,
            Err(ArticleError::NotFound(_))
        ));

        let first = create_comment(&store, &article.id, "u2", "  first ").await.unwrap();
        assert_eq!(first.text, "first");
        create_comment(&store, &article.id, "u3", &"y".repeat(500))
            .await
            .unwrap();

        let comments = comments_for(&store, &article.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, first.id);
    }

    #[tokio::test]
    async fn update_profile_merges_fields() {
        let (store, _tmp) = setup();
        store::put(&store, &User::new("u1", "Old")).await.unwrap();

        let user = update_profile(
            &store,
            "u1",
            ProfileUpdate {
                display_name: Some(" New ".into()),
                avatar: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(user.display_name, "New");
        assert_eq!(user.avatar, "");

        let missing = update_profile(
            &store,
            "nobody",
            ProfileUpdate {
                display_name: Some("x".into()),
                avatar: None,
            },
        )
        .await;
        assert!(matches!(missing, Err(ArticleError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn author_listing_hides_invisible_for_others() {
        let (store, _tmp) = setup();
        let mut hidden = create_article(&store, "u1", draft("Private", "")).await.unwrap();
        hidden.visible = false;
        store::put(&store, &hidden).await.unwrap();
        create_article(&store, "u1", draft("Public", "")).await.unwrap();

        assert_eq!(articles_by_author(&store, "u1", true).await.unwrap().len(), 2);
        assert_eq!(articles_by_author(&store, "u1", false).await.unwrap().len(), 1);
    }
}
