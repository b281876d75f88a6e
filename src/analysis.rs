//! Dream analysis via an OpenAI-compatible chat-completion endpoint.
//!
//! The model is asked to answer with bare JSON. Anything else is a parse
//! failure; nothing is defaulted or partially returned.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::db::models::ApiKeys;
use crate::store::{DocumentStore, StoreError};

const PROMPT: &str = "You analyse dream journal entries. Read the dream below and answer \
with JSON only, no prose and no code fences, in exactly this shape: \
{\"emotions\": [string], \"topics\": [string]}. \
Use at most five short lowercase words per list.\n\nDream:\n";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Completion API key is not configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Nothing to analyze")]
    EmptyInput,

    #[error("Settings error: {0}")]
    Store(#[from] StoreError),
}

/// Emotions and topics extracted from one dream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamAnalysis {
    pub emotions: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct AnalysisClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl AnalysisClient {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        url::Url::parse(&config.endpoint)
            .map_err(|e| AnalysisError::Network(format!("invalid endpoint: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    /// Analyze `text` using the completion key from the settings document.
    pub async fn analyze(
        &self,
        store: &dyn DocumentStore,
        text: &str,
    ) -> Result<DreamAnalysis, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let keys = ApiKeys::load(store).await?;
        let key = keys.completion_key().ok_or(AnalysisError::MissingApiKey)?;
        self.analyze_with_key(key, text).await
    }

    pub async fn analyze_with_key(
        &self,
        api_key: &str,
        text: &str,
    ) -> Result<DreamAnalysis, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: format!("{}{}", PROMPT, text),
            }],
        };

        tracing::debug!(model = %self.model, chars = text.len(), "Requesting dream analysis");

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AnalysisError::Parse("response has no message content".into()))?;

        let analysis = parse_content(&content)?;
        tracing::info!(
            emotions = analysis.emotions.len(),
            topics = analysis.topics.len(),
            "Dream analysis complete"
        );
        Ok(analysis)
    }
}

/// `content` must be exactly `{"emotions":[string],"topics":[string]}`.
pub fn parse_content(content: &str) -> Result<DreamAnalysis, AnalysisError> {
    serde_json::from_str(content.trim()).map_err(|e| {
        tracing::warn!("Model reply is not valid analysis JSON: {}", e);
        AnalysisError::Parse(e.to_string())
    })
}
