mod config;
mod events;
mod server;
mod state;
mod verify;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ConfigError, ServiceConfig, DEFAULT_INBOUND_BODY_MAX_BYTES};
pub use events::{route_event, route_event_at, EventResponse};
pub use server::{build_router, run_server};
pub use state::{AppState, RecentEvents};
