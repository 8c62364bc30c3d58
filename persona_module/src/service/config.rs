use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::DEFAULT_QUEUE_CAPACITY;
use crate::persona::{load_persona_profile, PersonaError, PersonaProfile};
use crate::reply::{ReplyConfig, DEFAULT_OPENAI_URL, DEFAULT_OUTBOUND_TIMEOUT, DEFAULT_SLACK_API_BASE};

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    Persona(#[from] PersonaError),
    #[error("failed to build outbound http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Legacy Slack verification token, compared against the payload `token`.
    pub verification_token: String,
    /// Enables `x-slack-signature` checks when set.
    pub signing_secret: Option<String>,
    pub openai_api_key: String,
    pub openai_url: String,
    pub slack_bot_token: String,
    pub slack_api_base: String,
    /// Home channel; other channels are ignored except direct messages.
    pub channel_id: String,
    pub operator_user_id: String,
    pub persona_user_id: String,
    pub persona_config_path: PathBuf,
    pub persona: PersonaProfile,
    pub reply_queue_capacity: usize,
    pub outbound_timeout: Duration,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| optional(key).ok_or(ConfigError::MissingEnv(key));

        let verification_token = required("SLACK_VERIFICATION_TOKEN")?;
        let openai_api_key = required("OPENAI_API_KEY")?;
        let slack_bot_token = required("SLACK_BOT_TOKEN")?;
        let channel_id = required("SLACK_CHANNEL_ID")?;
        let operator_user_id = required("OPERATOR_USER_ID")?;
        let persona_user_id = required("PERSONA_BOT_USER_ID")?;
        let signing_secret = optional("SLACK_SIGNING_SECRET");

        let host = optional("PERSONA_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match optional("PERSONA_PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "PERSONA_PORT",
                value,
            })?,
            None => 8080,
        };

        let persona_config_path = PathBuf::from(
            optional("PERSONA_CONFIG_PATH").unwrap_or_else(|| "persona.toml".to_string()),
        );
        let persona = load_persona_profile(&persona_config_path)?;

        let openai_url = optional("OPENAI_API_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let slack_api_base =
            optional("SLACK_API_BASE_URL").unwrap_or_else(|| DEFAULT_SLACK_API_BASE.to_string());
        let reply_queue_capacity = optional("REPLY_QUEUE_CAPACITY")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let outbound_timeout = optional("OUTBOUND_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_OUTBOUND_TIMEOUT);
        let inbound_body_max_bytes = optional("INBOUND_BODY_MAX_BYTES")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            verification_token,
            signing_secret,
            openai_api_key,
            openai_url,
            slack_bot_token,
            slack_api_base,
            channel_id,
            operator_user_id,
            persona_user_id,
            persona_config_path,
            persona,
            reply_queue_capacity,
            outbound_timeout,
            inbound_body_max_bytes,
        })
    }

    pub fn reply_config(&self) -> ReplyConfig {
        ReplyConfig {
            openai_api_key: self.openai_api_key.clone(),
            openai_url: self.openai_url.clone(),
            slack_bot_token: self.slack_bot_token.clone(),
            slack_api_base: self.slack_api_base.clone(),
            timeout: self.outbound_timeout,
        }
    }
}
