//! Thread resolution for inbound events.

use crate::event::InboundEvent;
use crate::state_store::ResponseStateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub thread_id: String,
    /// False when a newer message in the same thread has already been seen.
    pub is_latest: bool,
}

/// Replies go to the explicit thread, or start a thread under the event itself.
pub fn thread_id_for(event: &InboundEvent) -> String {
    event
        .thread_ts
        .as_ref()
        .unwrap_or(&event.ts)
        .as_str()
        .to_string()
}

pub fn resolve(event: &InboundEvent, store: &dyn ResponseStateStore) -> ResolvedContext {
    let thread_id = thread_id_for(event);
    let is_latest = store
        .thread(&thread_id)
        .map_or(true, |state| event.ts >= state.last_seen_ts);
    ResolvedContext {
        thread_id,
        is_latest,
    }
}
