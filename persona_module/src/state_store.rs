//! Process-lifetime bookkeeping for the response gate.
//!
//! Nothing here is persisted. Every trait method is one atomic read-modify-write
//! against the backing map; callers that read and later write (guards, then the
//! post-success update) accept the gap between the two.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::SlackTs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadState {
    pub thread_id: String,
    pub last_seen_ts: SlackTs,
    pub turn_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CooldownState {
    pub paused_until: Option<DateTime<Utc>>,
    pub last_response_at: HashMap<String, DateTime<Utc>>,
}

impl CooldownState {
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }
}

pub trait ResponseStateStore: Send + Sync {
    fn thread(&self, thread_id: &str) -> Option<ThreadState>;

    /// Record `ts` as seen in the thread, creating the thread on first sight.
    /// `last_seen_ts` never moves backwards.
    fn observe(&self, thread_id: &str, ts: &SlackTs) -> ThreadState;

    /// Bookkeeping after a reply was posted: one more turn in the thread and a
    /// persona-wide pause of `cooldown` starting at `now`.
    fn record_reply(
        &self,
        persona_id: &str,
        thread_id: &str,
        ts: &SlackTs,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> ThreadState;

    fn cooldown(&self) -> CooldownState;

    fn note_activity(&self, at: DateTime<Utc>);

    fn last_activity(&self) -> Option<DateTime<Utc>>;

    fn thread_count(&self) -> usize;
}

#[derive(Default)]
struct StoreInner {
    threads: HashMap<String, ThreadState>,
    cooldown: CooldownState,
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn touch_thread<'a>(
    threads: &'a mut HashMap<String, ThreadState>,
    thread_id: &str,
    ts: &SlackTs,
) -> &'a mut ThreadState {
    let state = threads
        .entry(thread_id.to_string())
        .or_insert_with(|| ThreadState {
            thread_id: thread_id.to_string(),
            last_seen_ts: ts.clone(),
            turn_count: 0,
        });
    if *ts > state.last_seen_ts {
        state.last_seen_ts = ts.clone();
    }
    state
}

impl ResponseStateStore for InMemoryStateStore {
    fn thread(&self, thread_id: &str) -> Option<ThreadState> {
        self.lock().threads.get(thread_id).cloned()
    }

    fn observe(&self, thread_id: &str, ts: &SlackTs) -> ThreadState {
        let mut inner = self.lock();
        touch_thread(&mut inner.threads, thread_id, ts).clone()
    }

    fn record_reply(
        &self,
        persona_id: &str,
        thread_id: &str,
        ts: &SlackTs,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> ThreadState {
        let mut inner = self.lock();
        let state = touch_thread(&mut inner.threads, thread_id, ts);
        state.turn_count += 1;
        let updated = state.clone();

        let pause = chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        inner.cooldown.paused_until = Some(now + pause);
        inner
            .cooldown
            .last_response_at
            .insert(persona_id.to_string(), now);
        updated
    }

    fn cooldown(&self) -> CooldownState {
        self.lock().cooldown.clone()
    }

    fn note_activity(&self, at: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.last_activity.map_or(true, |prev| at > prev) {
            inner.last_activity = Some(at);
        }
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.lock().last_activity
    }

    fn thread_count(&self) -> usize {
        self.lock().threads.len()
    }
}
