use std::sync::Arc;

use crate::agents::ClaudeAgent;
use crate::config::Config;
use crate::db::PgStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub backend: Arc<ClaudeAgent>,
    pub config: Arc<Config>,
}
