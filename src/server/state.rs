use axum::extract::FromRef;

use crate::config::AuthSettings;
use crate::mcp::McpDispatcher;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedDispatcher = Arc<McpDispatcher>;
pub type GuardedAuthSettings = Arc<AuthSettings>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub dispatcher: GuardedDispatcher,
    pub auth: GuardedAuthSettings,
}

impl ServerState {
    pub fn new(config: ServerConfig, dispatcher: McpDispatcher, auth: AuthSettings) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            dispatcher: Arc::new(dispatcher),
            auth: Arc::new(auth),
        }
    }
}

impl FromRef<ServerState> for GuardedDispatcher {
    fn from_ref(input: &ServerState) -> Self {
        input.dispatcher.clone()
    }
}

impl FromRef<ServerState> for GuardedAuthSettings {
    fn from_ref(input: &ServerState) -> Self {
        input.auth.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
