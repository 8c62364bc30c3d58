//! Admission gate: decides whether the persona answers an event.
//!
//! Guards run in a fixed order and the first failure wins:
//! addressing, working hours, cooldown, turn limit, staleness. Rejections are
//! ordinary outcomes, not errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;

use crate::context::{resolve, ResolvedContext};
use crate::event::InboundEvent;
use crate::persona::{PersonaProfile, WorkingHours};
use crate::relevance;
use crate::state_store::ResponseStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Cooldown,
    MaxTurns,
    Stale,
    AfterHours,
    Irrelevant,
    NotAddressed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Cooldown => "cooldown",
            RejectReason::MaxTurns => "max_turns",
            RejectReason::Stale => "stale",
            RejectReason::AfterHours => "after_hours",
            RejectReason::Irrelevant => "irrelevant",
            RejectReason::NotAddressed => "not_addressed",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one admitted event, used for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStage {
    Received,
    Admitted,
    Staggering,
    Generating,
    Posted,
}

impl ReplyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStage::Received => "received",
            ReplyStage::Admitted => "admitted",
            ReplyStage::Staggering => "staggering",
            ReplyStage::Generating => "generating",
            ReplyStage::Posted => "posted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit(ResolvedContext),
    Reject(RejectReason),
}

pub struct ResponseGate {
    profile: Arc<PersonaProfile>,
    persona_user_id: String,
    operator_user_id: String,
    store: Arc<dyn ResponseStateStore>,
}

impl ResponseGate {
    pub fn new(
        profile: Arc<PersonaProfile>,
        persona_user_id: impl Into<String>,
        operator_user_id: impl Into<String>,
        store: Arc<dyn ResponseStateStore>,
    ) -> Self {
        Self {
            profile,
            persona_user_id: persona_user_id.into(),
            operator_user_id: operator_user_id.into(),
            store,
        }
    }

    pub fn profile(&self) -> &PersonaProfile {
        &self.profile
    }

    pub fn persona_user_id(&self) -> &str {
        &self.persona_user_id
    }

    pub fn is_operator(&self, event: &InboundEvent) -> bool {
        !event.user_id.is_empty() && event.user_id == self.operator_user_id
    }

    /// Run all five guards. On admission the event becomes the newest seen
    /// message of its thread, so an earlier event still waiting out its
    /// stagger delay turns stale.
    pub fn evaluate(&self, event: &InboundEvent, now: DateTime<Utc>) -> GateDecision {
        if let Err(reason) = self.check_addressing(event) {
            return GateDecision::Reject(reason);
        }
        if !self.is_operator(event) && !within_working_hours(&self.profile.working_hours, now) {
            return GateDecision::Reject(RejectReason::AfterHours);
        }
        let context = resolve(event, self.store.as_ref());
        if let Err(reason) = self.check_throttles(&context, now) {
            return GateDecision::Reject(reason);
        }
        self.store.observe(&context.thread_id, &event.ts);
        GateDecision::Admit(context)
    }

    /// Cooldown, turn limit and staleness again, right before generation.
    pub fn recheck(&self, event: &InboundEvent, now: DateTime<Utc>) -> Result<(), RejectReason> {
        let context = resolve(event, self.store.as_ref());
        self.check_throttles(&context, now)
    }

    fn check_addressing(&self, event: &InboundEvent) -> Result<(), RejectReason> {
        let is_operator = self.is_operator(event);
        let is_mention = event.mentions(&self.persona_user_id);
        if is_operator && !is_mention && event.mentions_other_than(&self.persona_user_id) {
            return Err(RejectReason::NotAddressed);
        }
        if relevance::classify(&event.text, &self.profile.keywords, is_operator, is_mention) {
            Ok(())
        } else {
            Err(RejectReason::Irrelevant)
        }
    }

    fn check_throttles(
        &self,
        context: &ResolvedContext,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        if self.store.cooldown().is_paused(now) {
            return Err(RejectReason::Cooldown);
        }
        let turns = self
            .store
            .thread(&context.thread_id)
            .map_or(0, |state| state.turn_count);
        if turns >= self.profile.max_turns {
            return Err(RejectReason::MaxTurns);
        }
        if !context.is_latest {
            return Err(RejectReason::Stale);
        }
        Ok(())
    }

    /// Base delay plus uniform jitter, so personas sharing a thread do not
    /// answer at the same instant.
    pub fn stagger_delay(&self) -> Duration {
        let jitter_ms = self.profile.stagger_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.profile.stagger_base + Duration::from_millis(extra)
    }
}

pub fn within_working_hours(hours: &WorkingHours, now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&hours.timezone);
    hours.days.contains(&local.weekday())
        && local.hour() >= hours.start_hour
        && local.hour() < hours.end_hour
}
