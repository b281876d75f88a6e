// Like/save toggles: pure client state machine plus the atomic server transaction
use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::db::models::{Article, User};
use crate::store::{self, DocRef, DocumentStore, DynDocumentStore, StoreError, WriteBatch};

/// Which viewer/article relationship is being toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    Like,
    Save,
}

impl Engagement {
    /// Membership array on the user document.
    pub fn membership_field(self) -> &'static str {
        match self {
            Self::Like => "likedArticleIds",
            Self::Save => "savedArticleIds",
        }
    }

    /// Denormalized counter on the article document.
    pub fn counter_field(self) -> &'static str {
        match self {
            Self::Like => "likeCount",
            Self::Save => "savedCount",
        }
    }

    fn membership(self, user: &User) -> &Vec<String> {
        match self {
            Self::Like => &user.liked_article_ids,
            Self::Save => &user.saved_article_ids,
        }
    }

    fn counter(self, article: &Article) -> u64 {
        match self {
            Self::Like => article.like_count,
            Self::Save => article.saved_count,
        }
    }
}

impl fmt::Display for Engagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Like => write!(f, "like"),
            Self::Save => write!(f, "save"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("{0}")]
    InvalidTransition(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Client-visible toggle state for one viewer-article pair.
///
/// "Liked" reads as "saved" when driving an [`Engagement::Save`] toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToggleState {
    Unliked,
    LikedPendingConfirm,
    Liked,
    UnlikedPendingConfirm,
    /// Server refused the last toggle; behaves like the pre-toggle state.
    RolledBack { liked: bool },
}

/// Pure state transitions - no side effects
impl ToggleState {
    pub fn from_liked(liked: bool) -> Self {
        if liked {
            Self::Liked
        } else {
            Self::Unliked
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Unliked => "Unliked",
            Self::LikedPendingConfirm => "LikedPendingConfirm",
            Self::Liked => "Liked",
            Self::UnlikedPendingConfirm => "UnlikedPendingConfirm",
            Self::RolledBack { .. } => "RolledBack",
        }
    }

    /// What the UI shows right now.
    pub fn is_liked(&self) -> bool {
        match self {
            Self::LikedPendingConfirm | Self::Liked => true,
            Self::Unliked | Self::UnlikedPendingConfirm => false,
            Self::RolledBack { liked } => *liked,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::LikedPendingConfirm | Self::UnlikedPendingConfirm)
    }

    /// Transition: user tap. Flips the displayed state optimistically.
    pub fn toggle(self) -> Result<Self, EngagementError> {
        if self.is_pending() {
            return Err(EngagementError::InvalidTransition(format!(
                "Cannot toggle from {} state",
                self.state_name()
            )));
        }
        Ok(if self.is_liked() {
            Self::UnlikedPendingConfirm
        } else {
            Self::LikedPendingConfirm
        })
    }

    /// Transition: server transaction succeeded.
    pub fn confirm(self) -> Result<Self, EngagementError> {
        match self {
            Self::LikedPendingConfirm => Ok(Self::Liked),
            Self::UnlikedPendingConfirm => Ok(Self::Unliked),
            other => Err(EngagementError::InvalidTransition(format!(
                "Cannot confirm from {} state",
                other.state_name()
            ))),
        }
    }

    /// Transition: server transaction failed; revert to the pre-toggle value.
    pub fn fail(self) -> Result<Self, EngagementError> {
        match self {
            Self::LikedPendingConfirm => Ok(Self::RolledBack { liked: false }),
            Self::UnlikedPendingConfirm => Ok(Self::RolledBack { liked: true }),
            other => Err(EngagementError::InvalidTransition(format!(
                "Cannot roll back from {} state",
                other.state_name()
            ))),
        }
    }
}

/// Optimistic view state, kept apart from the last confirmed server count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticToggle {
    pub state: ToggleState,
    /// Count shown to the viewer.
    pub count: u64,
    /// Last count reported by the store.
    pub confirmed_count: u64,
}

impl OptimisticToggle {
    pub fn new(liked: bool, count: u64) -> Self {
        Self {
            state: ToggleState::from_liked(liked),
            count,
            confirmed_count: count,
        }
    }

    pub fn is_liked(&self) -> bool {
        self.state.is_liked()
    }

    /// Returns the new view and the membership the server should end up with.
    pub fn toggle(self) -> Result<(Self, bool), EngagementError> {
        let state = self.state.toggle()?;
        let desired = state.is_liked();
        let count = if desired {
            self.count + 1
        } else {
            self.count.saturating_sub(1)
        };
        Ok((
            Self {
                state,
                count,
                confirmed_count: self.confirmed_count,
            },
            desired,
        ))
    }

    /// Reconcile with the count the transaction actually wrote.
    pub fn confirm(self, server_count: u64) -> Result<Self, EngagementError> {
        Ok(Self {
            state: self.state.confirm()?,
            count: server_count,
            confirmed_count: server_count,
        })
    }

    pub fn fail(self) -> Result<Self, EngagementError> {
        Ok(Self {
            state: self.state.fail()?,
            count: self.confirmed_count,
            confirmed_count: self.confirmed_count,
        })
    }
}

/// Result of one server-side toggle transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    /// Membership after the transaction.
    pub active: bool,
    /// Counter after the transaction.
    pub count: u64,
    /// False when the request matched the stored state already.
    pub changed: bool,
}

/// Atomically set the viewer's membership for `article_id` to `desired`
/// and move the article counter by one, clamped at zero.
///
/// Repeating a request that matches the stored state writes nothing.
pub async fn apply_toggle(
    store: &dyn DocumentStore,
    kind: Engagement,
    user_id: &str,
    article_id: &str,
    desired: bool,
) -> Result<ToggleOutcome, EngagementError> {
    let uid = user_id.to_string();
    let aid = article_id.to_string();
    let read_set = vec![DocRef::of::<User>(user_id), DocRef::of::<Article>(article_id)];

    let outcome = store::transact(store, read_set, move |snapshot| {
        let Some(user) = snapshot.entity::<User>(&uid)? else {
            return Ok((
                WriteBatch::new(),
                Err(EngagementError::UserNotFound(uid.clone())),
            ));
        };
        let Some(article) = snapshot.entity::<Article>(&aid)? else {
            return Ok((
                WriteBatch::new(),
                Err(EngagementError::ArticleNotFound(aid.clone())),
            ));
        };

        let ids = kind.membership(&user);
        let current = kind.counter(&article);
        let member = ids.iter().any(|id| *id == aid);

        if member == desired {
            return Ok((
                WriteBatch::new(),
                Ok(ToggleOutcome {
                    active: member,
                    count: current,
                    changed: false,
                }),
            ));
        }

        let (ids, count) = if desired {
            let mut ids = ids.clone();
            ids.push(aid.clone());
            (ids, current + 1)
        } else {
            let ids: Vec<String> = ids.iter().filter(|id| **id != aid).cloned().collect();
            (ids, current.saturating_sub(1))
        };

        let mut batch = WriteBatch::new();
        batch.update(DocRef::of::<User>(uid.as_str()), fields(kind.membership_field(), json!(ids)));
        batch.update(
            DocRef::of::<Article>(aid.as_str()),
            fields(kind.counter_field(), json!(count)),
        );

        Ok((
            batch,
            Ok(ToggleOutcome {
                active: desired,
                count,
                changed: true,
            }),
        ))
    })
    .await??;

    if outcome.changed {
        tracing::info!(
            "{} {} -> {} by {} (count {})",
            kind,
            article_id,
            outcome.active,
            user_id,
            outcome.count
        );
    }
    Ok(outcome)
}

fn fields(name: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    map
}

/// Drives one viewer-article toggle end to end: optimistic flip,
/// transaction, then confirm with the stored count or roll back.
pub struct ToggleController {
    store: DynDocumentStore,
    kind: Engagement,
    user_id: String,
    article_id: String,
    view: OptimisticToggle,
}

impl ToggleController {
    pub fn new(
        store: DynDocumentStore,
        kind: Engagement,
        user_id: impl Into<String>,
        article_id: impl Into<String>,
        view: OptimisticToggle,
    ) -> Self {
        Self {
            store,
            kind,
            user_id: user_id.into(),
            article_id: article_id.into(),
            view,
        }
    }

    /// Seed the view from the stored user and article documents.
    pub async fn load(
        store: DynDocumentStore,
        kind: Engagement,
        user_id: &str,
        article_id: &str,
    ) -> Result<Self, EngagementError> {
        let (user, article) = tokio::join!(
            store::fetch::<User>(store.as_ref(), user_id),
            store::fetch::<Article>(store.as_ref(), article_id),
        );
        let user = user?.ok_or_else(|| EngagementError::UserNotFound(user_id.to_string()))?;
        let article =
            article?.ok_or_else(|| EngagementError::ArticleNotFound(article_id.to_string()))?;

        let liked = kind.membership(&user).iter().any(|id| id == article_id);
        let view = OptimisticToggle::new(liked, kind.counter(&article));
        Ok(Self::new(store, kind, user_id, article_id, view))
    }

    pub fn view(&self) -> OptimisticToggle {
        self.view
    }

    /// Optimistic half: flip the view immediately. Returns the desired membership.
    pub fn begin(&mut self) -> Result<bool, EngagementError> {
        let (view, desired) = self.view.toggle()?;
        self.view = view;
        Ok(desired)
    }

    /// Server half: run the transaction and reconcile the view with it.
    pub async fn settle(&mut self, desired: bool) -> Result<OptimisticToggle, EngagementError> {
        match apply_toggle(
            self.store.as_ref(),
            self.kind,
            &self.user_id,
            &self.article_id,
            desired,
        )
        .await
        {
            Ok(outcome) => {
                self.view = self.view.confirm(outcome.count)?;
                Ok(self.view)
            }
            Err(e) => {
                tracing::warn!(
                    "Rolling back {} of {} for {}: {}",
                    self.kind,
                    self.article_id,
                    self.user_id,
                    e
                );
                self.view = self.view.fail()?;
                Err(e)
            }
        }
    }

    pub async fn toggle(&mut self) -> Result<OptimisticToggle, EngagementError> {
        let desired = self.begin()?;
        self.settle(desired).await
    }
}
