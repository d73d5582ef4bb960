//! relay Gateway
//!
//! HTTP gateway in front of the message broker and the upstream API backend:
//! - Accepts tenant-scoped publish requests and hands them to the broker
//!   connection manager
//! - Proxies every other `/api` call to the upstream backend
//! - Serves a liveness health endpoint

pub mod api;
pub mod config;
pub mod state;

pub use api::create_router;
pub use config::Config;
pub use state::AppState;
