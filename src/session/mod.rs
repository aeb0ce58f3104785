//! In-memory session store.
//!
//! Maps opaque session tokens to user ids. Entries live until logout, until
//! they outlive the configured TTL, or until the process exits; nothing is
//! persisted, so a restart invalidates every session.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A live session
#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    user_id: i64,
    issued_at: Instant,
}

/// Thread-safe session store using dashmap
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store whose sessions expire `ttl` after issue
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Record a session for `user_id` under `token`, replacing any previous entry
    pub fn insert(&self, token: String, user_id: i64) {
        self.sessions.insert(
            token,
            SessionEntry {
                user_id,
                issued_at: Instant::now(),
            },
        );
    }

    /// Resolve a token to its user id. Expired entries are treated as absent.
    pub fn get(&self, token: &str) -> Option<i64> {
        let entry = self.sessions.get(token)?;
        if entry.issued_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.user_id)
    }

    /// Drop a session, returning the user id it belonged to
    pub fn remove(&self, token: &str) -> Option<i64> {
        self.sessions.remove(token).map(|(_, entry)| entry.user_id)
    }

    /// Clean up expired entries to prevent memory leaks
    pub fn cleanup_expired(&self) {
        let ttl = self.ttl;
        self.sessions
            .retain(|_, entry| entry.issued_at.elapsed() < ttl);
    }

    /// Get the number of tracked sessions (for monitoring)
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Random bytes per session token; the cookie carries twice as many hex chars
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Mint an unguessable session token from the thread-local CSPRNG
pub fn generate_token() -> String {
    let secret: [u8; SESSION_TOKEN_BYTES] = rand::rng().random();
    hex::encode(secret)
}

/// Spawn a background task to periodically sweep expired sessions
pub fn spawn_cleanup_task(store: Arc<SessionStore>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            store.cleanup_expired();
            tracing::debug!(
                "Session cleanup complete, {} sessions remaining",
                store.len()
            );
        }
    });
}
