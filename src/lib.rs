pub mod api;
pub mod config;
pub mod db;
pub mod session;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use std::time::Duration;

use crate::session::SessionStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(
            config.session.max_age_secs,
        )));
        Self {
            config,
            db,
            sessions,
        }
    }
}
