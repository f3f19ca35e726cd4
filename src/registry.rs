use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::session::{CallKey, CallSession, SessionContext};

/// Live calls keyed by identity. Only the dispatch loop writes to it.
pub struct SessionRegistry {
    sessions: HashMap<CallKey, CallSession>,
    ctx: Arc<SessionContext>,
    idle_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let idle_timeout = ctx.dialog.idle_timeout();
        Self {
            sessions: HashMap::new(),
            ctx,
            idle_timeout,
        }
    }

    /// Returns the session for `key`, creating it on first sight. The flag
    /// is true when the session was just created.
    pub fn get_or_create(&mut self, key: CallKey) -> (&mut CallSession, bool) {
        let ctx = &self.ctx;
        let mut created = false;
        let session = self.sessions.entry(key).or_insert_with(|| {
            created = true;
            CallSession::new(key, ctx.clone())
        });
        (session, created)
    }

    pub fn get(&self, key: &CallKey) -> Option<&CallSession> {
        self.sessions.get(key)
    }

    /// Drops a call on call-control hangup. Work already queued for it
    /// finishes on its own.
    pub fn remove(&mut self, key: &CallKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes sessions that have not been fed within the idle timeout.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let before = self.sessions.len();
        self.sessions.retain(|key, session| {
            let keep = now.saturating_duration_since(session.last_seen()) < timeout;
            if !keep {
                log::info!("[{}] evicted after {}s idle", key, timeout.as_secs());
            }
            keep
        });
        before - self.sessions.len()
    }
}
