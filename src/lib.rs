pub mod auth;
pub mod client;
pub mod clients;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod ws;

use std::sync::Arc;

use auth::Authenticator;
use ws::RoomHub;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RoomHub>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(hub: Arc<RoomHub>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { hub, authenticator }
    }
}
