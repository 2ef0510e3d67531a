//! Shared application state handed to every axum handler via `State`.

use std::sync::Arc;

use memoryrouter_core::orchestrator::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// `MEMORYROUTER_ADMIN_SECRET`, checked against `X-Admin-Secret` for
    /// `/v1/admin/*` routes that aren't authenticated by an `mk_admin*` key.
    pub admin_secret: Option<String>,
}
