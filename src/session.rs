//! Session repository: interface plus an in-memory reference implementation
//! with TTL and capacity eviction (spec §4.6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub request: Value,
    pub response: Value,
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::content::Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub cwd: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Session {
    pub fn new(cwd: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cwd,
            history: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub cwd: Option<Option<String>>,
    pub push_history: Option<HistoryEntry>,
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub count: usize,
    pub max_sessions: usize,
    pub ttl: Option<Duration>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Shallow-equality filter for [`SessionRepository::find`] (spec §9's
/// documented Open Question: this stays shallow, it does not reach into
/// `metadata`).
#[derive(Debug, Default, Clone)]
pub struct SessionFilter {
    pub cwd: Option<String>,
}

impl SessionFilter {
    fn matches(&self, session: &Session) -> bool {
        if let Some(cwd) = &self.cwd {
            if session.cwd.as_deref() != Some(cwd.as_str()) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: Session) -> Session;
    async fn get(&self, id: &str) -> Option<Session>;
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session, SessionError>;
    async fn delete(&self, id: &str);
    async fn list(&self) -> Vec<Session>;
    async fn clear(&self);
    async fn find(&self, filter: SessionFilter) -> Vec<Session>;
    async fn get_stats(&self) -> SessionStats;
}

struct Inner {
    sessions: HashMap<String, Session>,
}

/// In-memory reference [`SessionRepository`]. TTL=0 disables expiry.
/// Capacity eviction removes the least-recently-accessed session
/// (`lastAccessedAt`) when `create` would exceed `max_sessions`.
pub struct InMemorySessionRepository {
    inner: RwLock<Inner>,
    max_sessions: usize,
    ttl: Option<Duration>,
}

impl InMemorySessionRepository {
    pub fn new(max_sessions: usize, ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
            }),
            max_sessions,
            ttl,
        })
    }

    fn is_expired(&self, session: &Session) -> bool {
        match self.ttl {
            Some(ttl) if !ttl.is_zero() => {
                let age = Utc::now().signed_duration_since(session.last_accessed_at);
                age.to_std().map(|a| a > ttl).unwrap_or(false)
            }
            _ => false,
        }
    }

    fn evict_oldest_if_needed(inner: &mut Inner, max_sessions: usize) {
        if inner.sessions.len() < max_sessions {
            return;
        }
        if let Some(oldest_id) = inner
            .sessions
            .values()
            .min_by_key(|s| s.last_accessed_at)
            .map(|s| s.id.clone())
        {
            inner.sessions.remove(&oldest_id);
        }
    }

    /// Spawns the background cleanup scanner (spec §4.6: runs every
    /// `cleanup_interval`, default 60s; must not block shutdown, so it is
    /// spawned detached rather than joined).
    pub fn spawn_cleanup_scanner(self: &Arc<Self>, cleanup_interval: Duration) {
        let repo = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                repo.sweep_expired();
            }
        });
    }

    fn sweep_expired(&self) {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| self.is_expired(s))
            .map(|s| s.id.clone())
            .collect();
        for id in expired {
            inner.sessions.remove(&id);
        }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, mut session: Session) -> Session {
        let mut inner = self.inner.write();
        let now = Utc::now();
        session.created_at = now;
        session.last_accessed_at = now;
        Self::evict_oldest_if_needed(&mut inner, self.max_sessions);
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    async fn get(&self, id: &str) -> Option<Session> {
        let mut inner = self.inner.write();
        let expired = inner.sessions.get(id).map(|s| self.is_expired(s)).unwrap_or(false);
        if expired {
            inner.sessions.remove(id);
            return None;
        }
        if let Some(session) = inner.sessions.get_mut(id) {
            session.last_accessed_at = Utc::now();
            return Some(session.clone());
        }
        None
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session, SessionError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if let Some(cwd) = patch.cwd {
            session.cwd = cwd;
        }
        if let Some(entry) = patch.push_history {
            session.history.push(entry);
        }
        if let Some(metadata) = patch.metadata {
            session.metadata.extend(metadata);
        }
        session.last_accessed_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete(&self, id: &str) {
        self.inner.write().sessions.remove(id);
    }

    async fn list(&self) -> Vec<Session> {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| self.is_expired(s))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            inner.sessions.remove(id);
        }
        inner.sessions.values().cloned().collect()
    }

    async fn clear(&self) {
        self.inner.write().sessions.clear();
    }

    async fn find(&self, filter: SessionFilter) -> Vec<Session> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    async fn get_stats(&self) -> SessionStats {
        SessionStats {
            count: self.inner.read().sessions.len(),
            max_sessions: self.max_sessions,
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_timestamps() {
        let repo = InMemorySessionRepository::new(10, None);
        let s = repo.create(Session::new(None)).await;
        assert_eq!(s.created_at, s.last_accessed_at);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let repo = InMemorySessionRepository::new(1, None);
        let first = repo.create(Session::new(None)).await;
        let _second = repo.create(Session::new(None)).await;
        assert!(repo.get(&first.id).await.is_none());
    }

    #[tokio::test]
    async fn ttl_expires_sessions() {
        let repo = InMemorySessionRepository::new(10, Some(Duration::from_millis(10)));
        let s = repo.create(Session::new(None)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(repo.get(&s.id).await.is_none());
        assert!(repo.list().await.is_empty());
    }

    #[tokio::test]
    async fn update_rejects_unknown_id() {
        let repo = InMemorySessionRepository::new(10, None);
        let result = repo.update("missing", SessionPatch::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let repo = InMemorySessionRepository::new(10, None);
        repo.delete("missing").await;
        repo.delete("missing").await;
    }
}
