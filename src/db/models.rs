use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{Document, DocumentStore, StoreError};

pub const USERS: &str = "users";
pub const ARTICLES: &str = "articles";
pub const COMMENTS: &str = "comments";
pub const SETTINGS: &str = "settings";

/// Key of the singleton settings document holding third-party API keys.
pub const API_KEYS_DOC: &str = "api_keys";

/// Display name used whenever a user reference cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

/// A typed entity persisted as one document in a collection.
///
/// The document key doubles as the entity id, so `id` is stripped from the
/// stored body and re-attached on read.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn to_document(&self) -> Result<Document, StoreError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            other => Err(StoreError::Malformed(format!(
                "{} entity serialized to {}, expected an object",
                Self::COLLECTION,
                other
            ))),
        }
    }

    fn from_document(id: &str, mut doc: Document) -> Result<Self, StoreError> {
        doc.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        Ok(serde_json::from_value(serde_json::Value::Object(doc))?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub liked_article_ids: Vec<String>,
    #[serde(default)]
    pub saved_article_ids: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    const COLLECTION: &'static str = USERS;

    fn id(&self) -> &str {
        &self.id
    }
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: String::new(),
            liked_article_ids: Vec::new(),
            saved_article_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_liked(&self, article_id: &str) -> bool {
        self.liked_article_ids.iter().any(|id| id == article_id)
    }

    pub fn has_saved(&self, article_id: &str) -> bool {
        self.saved_article_ids.iter().any(|id| id == article_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub saved_count: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Entity for Article {
    const COLLECTION: &'static str = ARTICLES;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub article_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Entity for Comment {
    const COLLECTION: &'static str = COMMENTS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Third-party credentials kept in `settings/api_keys`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeys {
    #[serde(default)]
    pub image_host_key: Option<String>,
    #[serde(default)]
    pub completion_key: Option<String>,
}

impl ApiKeys {
    /// Read the singleton; a missing document means no keys configured.
    pub async fn load(store: &dyn DocumentStore) -> Result<Self, StoreError> {
        match store.get(SETTINGS, API_KEYS_DOC).await? {
            Some(doc) => Ok(serde_json::from_value(serde_json::Value::Object(doc))?),
            None => Ok(Self::default()),
        }
    }

    pub fn image_host_key(&self) -> Option<&str> {
        non_blank(self.image_host_key.as_deref())
    }

    pub fn completion_key(&self) -> Option<&str> {
        non_blank(self.completion_key.as_deref())
    }
}

fn non_blank(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

// --- Composite view-models (never persisted) ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub resolved: bool,
}

impl AuthorView {
    /// Placeholder for a dangling or unreadable user reference.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: UNKNOWN_USER.to_string(),
            avatar: None,
            resolved: false,
        }
    }
}

impl From<&User> for AuthorView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            avatar: (!user.avatar.is_empty()).then(|| user.avatar.clone()),
            resolved: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub author: AuthorView,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub id: String,
    pub title: String,
    pub text: String,
    pub image: String,
    pub emotions: Vec<String>,
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub author: AuthorView,
    pub comments: Vec<CommentView>,
    pub like_count: u64,
    pub saved_count: u64,
    pub viewer_liked: bool,
    pub viewer_saved: bool,
}

/// Compact row used by listing screens (today, search, community, profile).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSummary {
    pub id: String,
    pub title: String,
    pub text: String,
    pub image: String,
    pub topics: Vec<String>,
    pub like_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&Article> for ArticleSummary {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            title: article.title.clone(),
            text: article.text.clone(),
            image: article.image.clone(),
            topics: article.topics.clone(),
            like_count: article.like_count,
            created_at: article.created_at,
        }
    }
}
