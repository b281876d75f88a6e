// Post detail aggregation: one article plus everything needed to render it
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::db::models::{Article, AuthorView, Comment, CommentView, PostDetail, User};
use crate::store::{self, Direction, DocumentStore, DynDocumentStore, Query, StoreError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Article not found: {0}")]
    NotFound(String),

    #[error("Read failed: {0}")]
    ReadFailed(#[from] StoreError),
}

/// Assemble the composite detail view for `article_id`.
///
/// Only the article read itself is fatal. Author, commenter and viewer
/// lookups degrade to placeholders and are logged.
pub async fn fetch_post_detail(
    store: &dyn DocumentStore,
    article_id: &str,
    viewer: Option<&str>,
) -> Result<PostDetail, FetchError> {
    let article: Article = store::fetch(store, article_id)
        .await?
        .ok_or_else(|| FetchError::NotFound(article_id.to_string()))?;

    let (author, comments, viewer) = tokio::join!(
        resolve_author(store, &article.author_id),
        resolve_comments(store, &article.id),
        resolve_viewer(store, viewer),
    );

    let viewer_liked = viewer.as_ref().is_some_and(|u| u.has_liked(&article.id));
    let viewer_saved = viewer.as_ref().is_some_and(|u| u.has_saved(&article.id));

    Ok(PostDetail {
        id: article.id,
        title: article.title,
        text: article.text,
        image: article.image,
        emotions: article.emotions,
        topics: article.topics,
        created_at: article.created_at,
        author,
        comments,
        like_count: article.like_count,
        saved_count: article.saved_count,
        viewer_liked,
        viewer_saved,
    })
}

async fn resolve_author(store: &dyn DocumentStore, user_id: &str) -> AuthorView {
    match store::fetch::<User>(store, user_id).await {
        Ok(Some(user)) => AuthorView::from(&user),
        Ok(None) => {
            tracing::warn!("User {} not found, showing placeholder", user_id);
            AuthorView::unknown(user_id)
        }
        Err(e) => {
            tracing::warn!("Failed to load user {}: {}", user_id, e);
            AuthorView::unknown(user_id)
        }
    }
}

/// Comments oldest first, each with its author resolved.
///
/// Lookups run a few at a time; results keep the comment order, not arrival order.
async fn resolve_comments(store: &dyn DocumentStore, article_id: &str) -> Vec<CommentView> {
    let comments = match comments_for(store, article_id).await {
        Ok(comments) => comments,
        Err(e) => {
            tracing::warn!("Failed to load comments for {}: {}", article_id, e);
            return Vec::new();
        }
    };

    let authors: Vec<AuthorView> = stream::iter(
        comments
            .iter()
            .map(|comment| resolve_author(store, &comment.author_id))
            .collect::<Vec<_>>(),
    )
    .buffered(store::READ_FAN_OUT)
    .collect()
    .await;

    comments
        .into_iter()
        .zip(authors)
        .map(|(comment, author)| CommentView {
            id: comment.id,
            author,
            text: comment.text,
            created_at: comment.created_at,
        })
        .collect()
}

async fn resolve_viewer(store: &dyn DocumentStore, viewer: Option<&str>) -> Option<User> {
    let viewer_id = viewer?;
    match store::fetch::<User>(store, viewer_id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("Failed to load viewer {}: {}", viewer_id, e);
            None
        }
    }
}

/// Comments on an article, oldest first.
pub async fn comments_for(
    store: &dyn DocumentStore,
    article_id: &str,
) -> Result<Vec<Comment>, StoreError> {
    let query = Query::new()
        .eq("articleId", article_id)
        .order_by("createdAt", Direction::Ascending);
    store::query_all(store, &query).await
}

/// Loads a detail view on behalf of one screen.
///
/// Dismissing the screen cancels the token; an in-flight load is then
/// abandoned and nothing is handed back.
pub struct DetailLoader {
    store: DynDocumentStore,
    cancel: CancellationToken,
}

impl DetailLoader {
    pub fn new(store: DynDocumentStore) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Token the owning view cancels when it goes away.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn dismiss(&self) {
        self.cancel.cancel();
    }

    pub fn is_dismissed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `None` when the view was dismissed before the load finished.
    pub async fn load(
        &self,
        article_id: &str,
        viewer: Option<&str>,
    ) -> Option<Result<PostDetail, FetchError>> {
        if self.is_dismissed() {
            return None;
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!("Detail load for {} abandoned", article_id);
                None
            }
            result = fetch_post_detail(self.store.as_ref(), article_id, viewer) => {
                if self.is_dismissed() {
                    None
                } else {
                    Some(result)
                }
            }
        }
    }
}
