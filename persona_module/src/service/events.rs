use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchError, ReplyJob};
use crate::event::{parse_envelope, EventKind, InboundEvent, ValidationError};
use crate::gate::{GateDecision, ReplyStage};

use super::state::AppState;
use super::verify::{verify_slack_signature, verify_token};

/// Body of a webhook answer. Slack only looks at the status code, except for
/// the verification handshake where the challenge is echoed verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResponse {
    Challenge(String),
    Status(&'static str),
}

impl IntoResponse for EventResponse {
    fn into_response(self) -> Response {
        match self {
            EventResponse::Challenge(challenge) => challenge.into_response(),
            EventResponse::Status(status) => Json(json!({ "status": status })).into_response(),
        }
    }
}

fn filtered(status: &'static str) -> (StatusCode, EventResponse) {
    (StatusCode::OK, EventResponse::Status(status))
}

pub fn route_event(state: &AppState, headers: &HeaderMap, body: &[u8]) -> (StatusCode, EventResponse) {
    route_event_at(state, headers, body, Utc::now())
}

/// Handle one Events API delivery. Anything recognised but not answered still
/// gets a 200 so Slack does not redeliver it.
pub fn route_event_at(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    now: DateTime<Utc>,
) -> (StatusCode, EventResponse) {
    let envelope = match parse_envelope(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("slack payload rejected: {}", err);
            return filtered("invalid_payload");
        }
    };

    let config = &state.config;
    let signing_secret = config
        .signing_secret
        .as_deref()
        .filter(|secret| !secret.trim().is_empty());
    if let Err(reason) = verify_slack_signature(signing_secret, headers, body, now.timestamp()) {
        warn!("slack signature check failed: {}", reason);
        return (StatusCode::UNAUTHORIZED, EventResponse::Status(reason));
    }

    if envelope.is_url_verification() {
        info!("slack url verification challenge");
        return match envelope.challenge {
            Some(challenge) => (StatusCode::OK, EventResponse::Challenge(challenge)),
            None => filtered("invalid_payload"),
        };
    }

    let signature_verified = signing_secret.is_some();
    if let Err(reason) = verify_token(
        &config.verification_token,
        envelope.token.as_deref(),
        signature_verified,
    ) {
        warn!("slack verification token rejected: {}", reason);
        return (StatusCode::UNAUTHORIZED, EventResponse::Status(reason));
    }

    if !envelope.is_event_callback() {
        debug!("ignoring slack envelope type {}", envelope.envelope_type);
        return filtered("ignored");
    }
    let Some(payload) = envelope.event.as_ref() else {
        warn!("slack payload rejected: {}", ValidationError::MissingEvent);
        return filtered("invalid_payload");
    };

    let kind = EventKind::from_slack(&payload.event_type);
    if !matches!(kind, EventKind::Message | EventKind::AppMention) {
        debug!("ignoring slack event type {}", kind.as_str());
        return filtered("not_relevant_event");
    }
    if let Some(subtype) = payload.subtype.as_deref() {
        debug!("ignoring message subtype {}", subtype);
        return filtered("ignored_subtype");
    }
    if payload.bot_id.is_some() || payload.user.as_deref() == Some(config.persona_user_id.as_str()) {
        debug!("ignoring bot-originated event");
        return filtered("ignored_bot");
    }

    let event = match InboundEvent::from_payload(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!("slack payload rejected: {}", err);
            return filtered("invalid_payload");
        }
    };

    if event.channel_id != config.channel_id && !event.channel_id.starts_with('D') {
        debug!("ignoring event from channel {}", event.channel_id);
        return filtered("other_channel");
    }
    if event.kind != EventKind::AppMention && !event.has_mention_tag() {
        debug!("no persona tagged in message {}", event.ts);
        return filtered("not_for_this_bot");
    }
    if !state.recent.mark_if_new(&event.logical_key()) {
        info!(
            "skipping duplicate delivery kind={} key={}",
            event.kind.as_str(),
            event.logical_key()
        );
        return filtered("duplicate");
    }

    state.store.note_activity(now);
    info!(
        stage = ReplyStage::Received.as_str(),
        "slack {} from {} in {}: {:?}",
        event.kind.as_str(),
        event.user_id,
        event.channel_id,
        event.text
    );

    let context = match state.gate.evaluate(&event, now) {
        GateDecision::Admit(context) => context,
        GateDecision::Reject(reason) => {
            info!(
                outcome = "rejected",
                reason = reason.as_str(),
                "no reply for {}",
                event.logical_key()
            );
            return filtered(reason.as_str());
        }
    };

    let sender_is_operator = state.gate.is_operator(&event);
    let job = ReplyJob::new(event, context.thread_id, sender_is_operator);
    let job_id = job.job_id;
    let thread_id = job.thread_id.clone();
    match state.dispatcher.try_dispatch(job) {
        Ok(()) => {
            info!(
                %job_id,
                thread_id = %thread_id,
                stage = ReplyStage::Admitted.as_str(),
                "reply queued"
            );
            filtered("processing")
        }
        Err(DispatchError::QueueFull) => {
            warn!(%job_id, "reply queue full, dropping admitted event");
            filtered("busy")
        }
        Err(DispatchError::Closed) => {
            warn!(%job_id, "reply queue closed, dropping admitted event");
            filtered("shutting_down")
        }
    }
}
