//! Reply generation and delivery.
//!
//! Builds the two-message persona prompt, calls the OpenAI chat-completions
//! endpoint and posts the result back into the Slack thread.
//!
//! Configuration:
//! - `OPENAI_API_KEY`: completion API key
//! - `OPENAI_API_URL`: API base (default: `https://api.openai.com/v1`)
//! - `SLACK_BOT_TOKEN`: bot token for `chat.postMessage`
//! - `SLACK_API_BASE_URL`: Slack API base (default: `https://slack.com/api`)

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::persona::PersonaProfile;

/// Default OpenAI API URL
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default Slack Web API URL
pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// Timeout applied to both outbound calls
pub const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion API returned no content")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("slack API error: {0}")]
    Api(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl ReplyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyError::Generation(_) => "generation",
            ReplyError::Delivery(_) => "delivery",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplyConfig {
    pub openai_api_key: String,
    pub openai_url: String,
    pub slack_bot_token: String,
    pub slack_api_base: String,
    pub timeout: Duration,
}

/// Everything the completion call needs for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub persona_prompt: String,
    pub user_text: String,
    pub priority: bool,
}

impl GenerationRequest {
    pub fn new(profile: &PersonaProfile, user_text: &str, priority: bool) -> Self {
        let persona_prompt = if priority {
            format!("{}\n{}", profile.prompt, profile.priority_clause)
        } else {
            profile.prompt.clone()
        };
        Self {
            persona_prompt,
            user_text: user_text.to_string(),
            priority,
        }
    }

    fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: self.persona_prompt.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: self.user_text.clone(),
            },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ReplyGenerator {
    config: ReplyConfig,
    profile: Arc<PersonaProfile>,
    client: Client,
}

impl ReplyGenerator {
    /// Fails when the HTTP client cannot be built with the configured timeout.
    pub fn new(config: ReplyConfig, profile: Arc<PersonaProfile>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        info!(
            "ReplyGenerator initialized: persona={}, model={}, openai={}, slack={}",
            profile.id, profile.model, config.openai_url, config.slack_api_base
        );

        Ok(Self {
            config,
            profile,
            client,
        })
    }

    /// Ask the model for a reply in the persona's voice.
    pub async fn generate(
        &self,
        user_text: &str,
        sender_is_operator: bool,
    ) -> Result<String, GenerationError> {
        let request = GenerationRequest::new(&self.profile, user_text, sender_is_operator);
        let url = format!("{}/chat/completions", self.config.openai_url.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: self.profile.model.clone(),
            max_tokens: self.profile.max_tokens,
            messages: request.messages(),
        };

        debug!(
            "Calling OpenAI: {} with model {} (priority={})",
            url, self.profile.model, request.priority
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.openai_api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(content)
    }

    /// Post `text` into the channel, threaded under `thread_ts`.
    pub async fn post(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/chat.postMessage",
            self.config.slack_api_base.trim_end_matches('/')
        );
        let body = PostMessageRequest {
            channel,
            text,
            thread_ts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.slack_bot_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }

        let result: PostMessageResponse = response.json().await?;
        if !result.ok {
            return Err(DeliveryError::Api(
                result.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        debug!("posted reply to channel={} thread_ts={}", channel, thread_ts);
        Ok(())
    }

    /// Generate then post; returns the posted text.
    pub async fn generate_and_post(
        &self,
        user_text: &str,
        sender_is_operator: bool,
        channel: &str,
        thread_ts: &str,
    ) -> Result<String, ReplyError> {
        let reply = self.generate(user_text, sender_is_operator).await?;
        self.post(channel, thread_ts, &reply).await?;
        Ok(reply)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    thread_ts: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}
