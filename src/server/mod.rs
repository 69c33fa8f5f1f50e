//! HTTP and websocket server
//!
//! Handles the account routes, the capability guard in front of them, and
//! the websocket notification hub.

pub mod connections;
pub mod error;
mod handlers;
pub mod hub;
pub mod protocol;
pub mod routes;
pub mod subscriptions;
pub mod websocket;

pub use connections::{ConnectionHandle, ConnectionRegistry, OutboundMessage, SendError};
pub use error::ApiError;
pub use handlers::MAX_APPLICATIONS;
pub use hub::{HubError, NotificationHub, PublishReport};
pub use protocol::{ControlMessage, Envelope, NotificationType, OpCode, ServerMessage};
pub use routes::{build_router, route_table, RouteSpec, Verb};
pub use subscriptions::{SubscriptionChange, SubscriptionIndex};

use crate::auth::CredentialResolver;
use crate::config::ServerConfig;
use crate::storage::AccountStore;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<CredentialResolver>,
    pub accounts: Arc<dyn AccountStore>,
    pub hub: Arc<NotificationHub>,
}

impl AppState {
    pub fn new<S: AccountStore + 'static>(store: Arc<S>, config: &ServerConfig) -> Self {
        let resolver = Arc::new(CredentialResolver::new(store.clone()));
        let hub = Arc::new(NotificationHub::new(
            config.topics.clone(),
            config.hub.clone(),
        ));

        Self {
            resolver,
            accounts: store,
            hub,
        }
    }
}

/// The guildgate API server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new<S: AccountStore + 'static>(config: ServerConfig, store: Arc<S>) -> Self {
        let state = AppState::new(store, &config);
        Self { config, state }
    }

    /// Hub handle for publishing from outside the HTTP routes
    pub fn hub(&self) -> Arc<NotificationHub> {
        self.state.hub.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.config.prefix)
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            prefix = %self.config.prefix,
            topics = self.config.topics.len(),
            "guildgate listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("guildgate stopped");
        Ok(())
    }
}
