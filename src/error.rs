use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::analysis::AnalysisError;
use crate::articles::ArticleError;
use crate::auth::AuthError;
use crate::detail::FetchError;
use crate::engagement::EngagementError;
use crate::images::UploadError;
use crate::store::StoreError;

const READ_FAILED: &str = "read failed";
const ANALYSIS_FAILED: &str = "could not analyze dream";
const UPLOAD_FAILED: &str = "upload failed";
const CONFLICT: &str = "Conflicting update, please retry";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not signed in")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Article(#[from] ArticleError),

    #[error(transparent)]
    Engagement(#[from] EngagementError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

fn store_status(e: &StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found".to_string()),
        StoreError::Conflict(_) => (StatusCode::CONFLICT, CONFLICT.to_string()),
        StoreError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        StoreError::Timeout(_) => (StatusCode::BAD_GATEWAY, READ_FAILED.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, READ_FAILED.to_string()),
    }
}

impl AppError {
    /// Status code and the message the client is allowed to see.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials | AuthError::NoSession => {
                    (StatusCode::UNAUTHORIZED, e.to_string())
                }
                AuthError::EmailTaken => (StatusCode::CONFLICT, e.to_string()),
                AuthError::WeakPassword(_) | AuthError::InvalidEmail => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                AuthError::Store(inner) => store_status(inner),
                AuthError::Database(_) | AuthError::Pool(_) | AuthError::Hash(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, READ_FAILED.to_string())
                }
            },

            AppError::Store(e) => store_status(e),

            AppError::Fetch(e) => match e {
                FetchError::NotFound(_) => (StatusCode::NOT_FOUND, "Article not found".to_string()),
                FetchError::ReadFailed(inner) => store_status(inner),
            },

            AppError::Article(e) => match e {
                ArticleError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                ArticleError::NotFound(_) => (StatusCode::NOT_FOUND, "Article not found".to_string()),
                ArticleError::UserNotFound(_) => (StatusCode::NOT_FOUND, "User not found".to_string()),
                ArticleError::Store(inner) => store_status(inner),
            },

            AppError::Engagement(e) => match e {
                EngagementError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
                EngagementError::ArticleNotFound(_) => {
                    (StatusCode::NOT_FOUND, "Article not found".to_string())
                }
                EngagementError::UserNotFound(_) => {
                    (StatusCode::NOT_FOUND, "User not found".to_string())
                }
                EngagementError::Store(inner) => store_status(inner),
            },

            AppError::Analysis(e) => match e {
                AnalysisError::EmptyInput => (StatusCode::BAD_REQUEST, e.to_string()),
                AnalysisError::MissingApiKey => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
                AnalysisError::Parse(_) => (StatusCode::BAD_GATEWAY, ANALYSIS_FAILED.to_string()),
                AnalysisError::Network(_) | AnalysisError::Api(..) => {
                    (StatusCode::BAD_GATEWAY, READ_FAILED.to_string())
                }
                AnalysisError::Store(inner) => store_status(inner),
            },

            AppError::Upload(e) => match e {
                UploadError::Empty => (StatusCode::BAD_REQUEST, e.to_string()),
                UploadError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
                UploadError::MissingApiKey => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
                UploadError::Network(_)
                | UploadError::Api(..)
                | UploadError::Parse(_)
                | UploadError::Rejected(_) => (StatusCode::BAD_GATEWAY, UPLOAD_FAILED.to_string()),
                UploadError::Store(inner) => store_status(inner),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!("{}: {}", status, self);
        } else {
            tracing::debug!("{}: {}", status, self);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    fn message(err: impl Into<AppError>) -> String {
        err.into().status_and_message().1
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(response_status(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_status(AuthError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn auth_messages_are_verbatim() {
        assert_eq!(message(AuthError::InvalidCredentials), "Invalid email or password");
        assert_eq!(response_status(AuthError::EmailTaken), StatusCode::CONFLICT);
        assert_eq!(response_status(AuthError::WeakPassword(6)), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(
            response_status(FetchError::NotFound("a1".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            response_status(ArticleError::UserNotFound("u1".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn transport_errors_are_generic() {
        let err = FetchError::ReadFailed(StoreError::Task("worker panicked".into()));
        assert_eq!(message(err), "read failed");

        let timeout = StoreError::Timeout(Duration::from_secs(10));
        assert_eq!(response_status(timeout), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn analysis_parse_failure_is_distinct() {
        let err = AnalysisError::Parse("expected value".into());
        assert_eq!(response_status(AnalysisError::Parse("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(message(err), "could not analyze dream");
        assert_eq!(message(AnalysisError::Network("reset".into())), "read failed");
    }

    #[test]
    fn conflicts_return_409() {
        let err = EngagementError::Store(StoreError::Conflict("gave up".into()));
        assert_eq!(response_status(err), StatusCode::CONFLICT);
    }

    #[test]
    fn upload_limits() {
        assert_eq!(response_status(UploadError::TooLarge(1)), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response_status(UploadError::Rejected(400)), StatusCode::BAD_GATEWAY);
    }
}
