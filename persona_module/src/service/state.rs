use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::dispatch::{spawn_reply_dispatcher, DispatcherControl, ReplyDispatcher, ReplyPipeline};
use crate::gate::ResponseGate;
use crate::reply::ReplyGenerator;
use crate::state_store::{InMemoryStateStore, ResponseStateStore};

use super::config::{ConfigError, ServiceConfig};

const RECENT_EVENT_CAP: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub gate: Arc<ResponseGate>,
    pub store: Arc<dyn ResponseStateStore>,
    pub dispatcher: ReplyDispatcher,
    pub recent: Arc<RecentEvents>,
}

impl AppState {
    /// Wire the gate, generator and dispatcher around a fresh in-memory store.
    /// Must run inside a tokio runtime; the dispatcher task starts immediately.
    pub fn build(config: ServiceConfig) -> Result<(Self, DispatcherControl), ConfigError> {
        let config = Arc::new(config);
        let profile = Arc::new(config.persona.clone());
        let store: Arc<dyn ResponseStateStore> = Arc::new(InMemoryStateStore::new());
        let gate = Arc::new(ResponseGate::new(
            profile.clone(),
            config.persona_user_id.clone(),
            config.operator_user_id.clone(),
            store.clone(),
        ));
        let generator = ReplyGenerator::new(config.reply_config(), profile)?;
        let pipeline = Arc::new(ReplyPipeline::new(gate.clone(), generator, store.clone()));
        let (dispatcher, control) = spawn_reply_dispatcher(pipeline, config.reply_queue_capacity);

        let state = Self {
            config,
            gate,
            store,
            dispatcher,
            recent: Arc::new(RecentEvents::new(RECENT_EVENT_CAP)),
        };
        Ok((state, control))
    }
}

/// Bounded set of recently handled logical event keys. Oldest keys fall out
/// first once `cap` is reached.
pub struct RecentEvents {
    cap: usize,
    inner: Mutex<RecentInner>,
}

#[derive(Default)]
struct RecentInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentEvents {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new(RecentInner::default()),
        }
    }

    /// True the first time `key` is seen.
    pub fn mark_if_new(&self, key: &str) -> bool {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.seen.contains(key) {
            return false;
        }
        inner.seen.insert(key.to_string());
        inner.order.push_back(key.to_string());
        while inner.order.len() > self.cap {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }
}
