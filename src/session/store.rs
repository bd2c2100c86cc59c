//! Per-application session store.
//!
//! # Responsibilities
//! - Resolve the session id a request carries (cookie, then query parameter)
//! - Create and bind new sessions
//! - Expire sessions lazily on lookup and periodically via the sweeper

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::http::{Cookie, Request, Response, ResponseError};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::session::session::{Session, SessionError, SessionMap};

/// Counts reported by [`SessionStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    /// Sessions removed by expiry since the store was created.
    pub expired_total: u64,
}

/// Admin view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at_ms: u64,
    pub last_accessed_at_ms: u64,
    pub max_inactive_secs: i64,
    pub attributes: usize,
    pub expired: bool,
}

struct Sweeper {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Session store owned by exactly one application context.
pub struct SessionStore {
    sessions: Arc<SessionMap>,
    config: SessionConfig,
    /// Context path, used as log field and metric label.
    scope: String,
    /// Interval given to new sessions; starts from `config.max_inactive_secs`.
    default_max_inactive: AtomicI64,
    expired_total: AtomicU64,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SessionStore {
    pub fn new(scope: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            default_max_inactive: AtomicI64::new(config.max_inactive_secs),
            config,
            scope: scope.into(),
            expired_total: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Max-inactive interval applied to sessions created from now on.
    pub fn default_max_inactive(&self) -> i64 {
        self.default_max_inactive.load(Ordering::Relaxed)
    }

    pub fn set_default_max_inactive(&self, seconds: i64) {
        self.default_max_inactive.store(seconds, Ordering::Relaxed);
    }

    /// Number of stored sessions, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Resolve the caller's session, creating and binding one when asked.
    ///
    /// A new session is announced with a `Set-Cookie` on `response`.
    pub fn get_session(
        &self,
        request: &Request,
        response: &mut Response,
        create: bool,
    ) -> Result<Option<Arc<Session>>, SessionError> {
        if let Some(id) = self.requested_session_id(request) {
            if let Some(session) = self.find(id) {
                return Ok(Some(session));
            }
        }

        if !create {
            return Ok(None);
        }
        if response.is_committed() {
            return Err(SessionError::Response(ResponseError::Committed));
        }

        let session = self.create();
        response.add_cookie(
            Cookie::new(self.config.cookie_name.as_str(), session.id())
                .with_path("/")
                .http_only(true),
        )?;
        Ok(Some(session))
    }

    /// Session id presented by the request, cookie first.
    pub fn requested_session_id<'r>(&self, request: &'r Request) -> Option<&'r str> {
        request
            .cookie(&self.config.cookie_name)
            .map(|c| c.value())
            .or_else(|| request.parameter(&self.config.query_parameter))
            .filter(|id| !id.is_empty())
    }

    /// Look up a live session and refresh it. Expired entries are removed.
    pub fn find(&self, id: &str) -> Option<Arc<Session>> {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().is_expired() {
                    let session = entry.remove();
                    self.record_expired(&session, 1);
                    None
                } else {
                    entry.get().access();
                    Some(Arc::clone(entry.get()))
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Create and store a session under a fresh id.
    pub fn create(&self) -> Arc<Session> {
        loop {
            let id = Uuid::new_v4().to_string();
            let session = Arc::new(Session::new(
                id.clone(),
                self.default_max_inactive(),
                Arc::downgrade(&self.sessions),
            ));
            let inserted = match self.sessions.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&session));
                    true
                }
                Entry::Occupied(_) => false,
            };
            if inserted {
                tracing::debug!(context = %self.scope, session_id = %session.id(), "Session created");
                metrics::record_sessions(&self.scope, self.sessions.len());
                return session;
            }
        }
    }

    /// Remove and invalidate every expired session. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            if let Some((_, session)) = self.sessions.remove_if(&id, |_, s| s.is_expired()) {
                self.record_expired(&session, 0);
                removed += 1;
            }
        }

        if removed > 0 {
            self.expired_total.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::record_sessions_expired(&self.scope, removed as u64);
            tracing::info!(context = %self.scope, removed, "Expired sessions swept");
        }
        metrics::record_sessions(&self.scope, self.sessions.len());
        removed
    }

    fn record_expired(&self, session: &Session, counted: u64) {
        session.expire();
        if counted > 0 {
            self.expired_total.fetch_add(counted, Ordering::Relaxed);
            metrics::record_sessions_expired(&self.scope, counted);
        }
        tracing::debug!(context = %self.scope, session_id = %session.id(), "Session expired");
    }

    pub fn stats(&self) -> SessionStats {
        let total = self.sessions.len();
        let expired = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .count();
        SessionStats {
            total,
            active: total.saturating_sub(expired),
            expired,
            expired_total: self.expired_total.load(Ordering::Relaxed),
        }
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionSummary {
                    id: session.id().to_string(),
                    created_at_ms: epoch_millis(session.created_at()),
                    last_accessed_at_ms: epoch_millis(session.last_accessed_at()),
                    max_inactive_secs: session.max_inactive_interval(),
                    attributes: session.attribute_count(),
                    expired: session.is_expired(),
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at_ms);
        summaries
    }

    /// Start the periodic expiry sweep. Calling it twice keeps the first sweeper.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let shutdown = Shutdown::new();
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let handle = tokio::spawn(run_sweeper(
            Arc::downgrade(self),
            period,
            shutdown.subscribe(),
        ));
        *slot = Some(Sweeper { shutdown, handle });
    }

    fn stop_sweeper(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown.trigger();
            sweeper.handle.abort();
        }
    }

    /// Stop sweeping and invalidate every session.
    pub fn destroy(&self) {
        self.stop_sweeper();

        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut invalidated = 0usize;
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.expire();
                invalidated += 1;
            }
        }

        metrics::record_sessions(&self.scope, 0);
        tracing::info!(context = %self.scope, invalidated, "Session store destroyed");
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

async fn run_sweeper(
    store: std::sync::Weak<SessionStore>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else { break };
                store.cleanup_expired();
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
    tracing::debug!("Session sweeper stopped");
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
