//! Slack Events API payloads and the normalized inbound event.
//!
//! The webhook only ever sees two envelope types: `url_verification` during app
//! setup and `event_callback` for everything else. Callbacks are flattened
//! into an [`InboundEvent`] before any gating happens.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const URL_VERIFICATION: &str = "url_verification";
pub const EVENT_CALLBACK: &str = "event_callback";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("event_callback without event body")]
    MissingEvent,
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Outer Slack envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event: Option<SlackEventPayload>,
}

impl SlackEnvelope {
    pub fn is_url_verification(&self) -> bool {
        self.envelope_type == URL_VERIFICATION
    }

    pub fn is_event_callback(&self) -> bool {
        self.envelope_type == EVENT_CALLBACK
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

pub fn parse_envelope(body: &[u8]) -> Result<SlackEnvelope, ValidationError> {
    Ok(serde_json::from_slice(body)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message,
    AppMention,
    Other(String),
}

impl EventKind {
    pub fn from_slack(value: &str) -> Self {
        match value {
            "message" => EventKind::Message,
            "app_mention" => EventKind::AppMention,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::AppMention => "app_mention",
            EventKind::Other(value) => value.as_str(),
        }
    }
}

/// Slack message timestamp (`"1700000000.123456"`).
///
/// Ordered by seconds then fractional part; values that do not parse fall back
/// to plain string ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlackTs(String);

impl SlackTs {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> Option<(u64, u64)> {
        let (secs, frac) = match self.0.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (self.0.as_str(), ""),
        };
        if frac.len() > 9 || !frac.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let secs = secs.parse::<u64>().ok()?;
        let padded = format!("{:0<9}", frac);
        let frac = padded.parse::<u64>().ok()?;
        Some((secs, frac))
    }
}

impl Ord for SlackTs {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(left), Some(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SlackTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SlackTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat event flattened out of the Slack envelope.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    pub ts: SlackTs,
    pub thread_ts: Option<SlackTs>,
    pub bot_mentions: BTreeSet<String>,
    pub is_bot_originated: bool,
    pub subtype: Option<String>,
}

impl InboundEvent {
    pub fn from_payload(payload: &SlackEventPayload) -> Result<Self, ValidationError> {
        let channel_id = payload
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingField("channel"))?;
        let ts = payload
            .ts
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingField("ts"))?;
        let text = payload.text.clone().unwrap_or_default();

        Ok(Self {
            kind: EventKind::from_slack(&payload.event_type),
            bot_mentions: extract_mentions(&text),
            text,
            user_id: payload.user.clone().unwrap_or_default(),
            channel_id: channel_id.to_string(),
            ts: SlackTs::new(ts),
            thread_ts: payload
                .thread_ts
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .map(SlackTs::new),
            is_bot_originated: payload.bot_id.is_some(),
            subtype: payload.subtype.clone(),
        })
    }

    /// `app_mention` events, or any event whose text tags `persona_user_id`.
    pub fn mentions(&self, persona_user_id: &str) -> bool {
        self.kind == EventKind::AppMention || self.bot_mentions.contains(persona_user_id)
    }

    pub fn mentions_other_than(&self, persona_user_id: &str) -> bool {
        self.bot_mentions.iter().any(|id| id != persona_user_id)
    }

    pub fn has_mention_tag(&self) -> bool {
        !self.bot_mentions.is_empty()
    }

    /// Key shared by the `message` and `app_mention` deliveries of one post.
    pub fn logical_key(&self) -> String {
        format!("{}:{}", self.channel_id, self.ts)
    }
}

fn mention_regex() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"<@([A-Z0-9]+)(?:\|[^>]*)?>").expect("valid mention regex"))
}

pub fn extract_mentions(text: &str) -> BTreeSet<String> {
    mention_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
