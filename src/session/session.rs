//! A single client session.
//!
//! # Responsibilities
//! - Hold the attribute map and access timestamps
//! - Decide expiry from the max-inactive interval
//! - Refuse every operation once invalidated

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::http::ResponseError;

/// Sessions of one store, keyed by id.
pub(crate) type SessionMap = DashMap<String, Arc<Session>>;

/// Errors raised by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} has been invalidated")]
    Invalidated(String),
    #[error("attribute (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cannot bind session: {0}")]
    Response(#[from] ResponseError),
}

#[derive(Debug)]
struct SessionState {
    attributes: HashMap<String, Value>,
    last_accessed: Instant,
    last_accessed_at: SystemTime,
    is_new: bool,
    valid: bool,
}

/// Server-side state correlated with one client.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: SystemTime,
    /// Seconds; zero or negative disables inactivity expiry.
    max_inactive_secs: AtomicI64,
    state: Mutex<SessionState>,
    owner: Weak<SessionMap>,
}

impl Session {
    pub(crate) fn new(id: String, max_inactive_secs: i64, owner: Weak<SessionMap>) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            created_at: now,
            max_inactive_secs: AtomicI64::new(max_inactive_secs),
            state: Mutex::new(SessionState {
                attributes: HashMap::new(),
                last_accessed: Instant::now(),
                last_accessed_at: now,
                is_new: true,
                valid: true,
            }),
            owner,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.lock();
        if state.valid {
            Ok(state)
        } else {
            Err(SessionError::Invalidated(self.id.clone()))
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> Result<SystemTime, SessionError> {
        self.live()?;
        Ok(self.created_at)
    }

    pub fn last_accessed_time(&self) -> Result<SystemTime, SessionError> {
        Ok(self.live()?.last_accessed_at)
    }

    pub fn max_inactive_interval(&self) -> i64 {
        self.max_inactive_secs.load(Ordering::Relaxed)
    }

    pub fn set_max_inactive_interval(&self, seconds: i64) -> Result<(), SessionError> {
        let _state = self.live()?;
        self.max_inactive_secs.store(seconds, Ordering::Relaxed);
        Ok(())
    }

    /// True until a later request presents this session's id.
    pub fn is_new(&self) -> Result<bool, SessionError> {
        Ok(self.live()?.is_new)
    }

    pub fn is_valid(&self) -> bool {
        self.lock().valid
    }

    /// Inactive for longer than the max-inactive interval.
    pub fn is_expired(&self) -> bool {
        let max = self.max_inactive_interval();
        if max <= 0 {
            return false;
        }
        self.lock().last_accessed.elapsed() > Duration::from_secs(max as u64)
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.live()?.attributes.get(name).cloned())
    }

    /// Typed read of an attribute.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SessionError> {
        match self.attribute(name)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store an attribute. `Value::Null` removes it.
    pub fn set_attribute(&self, name: &str, value: Value) -> Result<(), SessionError> {
        let mut state = self.live()?;
        if value.is_null() {
            state.attributes.remove(name);
        } else {
            state.attributes.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Typed write of an attribute.
    pub fn set<T: Serialize>(&self, name: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        self.set_attribute(name, value)
    }

    pub fn remove_attribute(&self, name: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.live()?.attributes.remove(name))
    }

    pub fn attribute_names(&self) -> Result<Vec<String>, SessionError> {
        let mut names: Vec<String> = self.live()?.attributes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn attribute_count(&self) -> usize {
        self.lock().attributes.len()
    }

    /// Clear attributes, mark invalid for good and drop out of the owning store.
    pub fn invalidate(&self) -> Result<(), SessionError> {
        {
            let mut state = self.live()?;
            state.valid = false;
            state.attributes.clear();
        }
        if let Some(map) = self.owner.upgrade() {
            map.remove_if(&self.id, |_, s| std::ptr::eq(s.as_ref(), self));
        }
        tracing::debug!(session_id = %self.id, "Session invalidated");
        Ok(())
    }

    /// Refresh the access time on lookup.
    pub(crate) fn access(&self) {
        let mut state = self.lock();
        if state.valid {
            state.last_accessed = Instant::now();
            state.last_accessed_at = SystemTime::now();
            state.is_new = false;
        }
    }

    /// Invalidate after the store already removed the entry.
    pub(crate) fn expire(&self) {
        let mut state = self.lock();
        state.valid = false;
        state.attributes.clear();
    }

    pub(crate) fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn last_accessed_at(&self) -> SystemTime {
        self.lock().last_accessed_at
    }
}
