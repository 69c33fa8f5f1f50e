//! guildgate - account API and realtime notification relay
//!
//! Resolves opaque credentials into capability-scoped principals, serves the
//! account and application routes, and fans events published by verified
//! applications out to websocket subscribers.

pub mod auth;
pub mod config;
pub mod server;
pub mod storage;
pub mod topics;

pub use auth::{Authenticated, Capability, CapabilitySet, CredentialResolver, Principal};
pub use config::{HubConfig, ServerConfig};
pub use server::{ApiServer, AppState, NotificationHub};
pub use storage::{AccountStore, CredentialStore, MemoryStore, PostgresStore};
pub use topics::{Topic, TopicSet};
