pub mod context;
pub mod dispatch;
pub mod event;
pub mod gate;
pub mod persona;
pub mod relevance;
pub mod reply;
pub mod service;
pub mod state_store;

pub use dispatch::{ReplyDispatcher, ReplyJob, ReplyOutcome, ReplyPipeline};
pub use gate::{GateDecision, RejectReason, ResponseGate};
pub use persona::PersonaProfile;
pub use reply::{ReplyConfig, ReplyGenerator};
pub use state_store::{InMemoryStateStore, ResponseStateStore};
