//! Session store: in-memory sessions keyed by identifier pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::model::{Session, SessionKey};
use crate::bridge::AgentRunner;
use crate::error::Result;

/// Exclusive access to one session. Gate actions hold it for their whole
/// duration, remote calls included.
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session store.
///
/// Sessions share no state; the map lock is only held for lookups,
/// inserts and removals, never across a remote call.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
    runner: Arc<dyn AgentRunner>,
}

impl SessionStore {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            runner,
        })
    }

    /// Handle for `key` if the session exists.
    pub async fn existing(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Handle for `key`, creating the session on first access.
    ///
    /// First creation initializes the runner's conversation for the same
    /// pair so later turns resume it. If that fails nothing is inserted.
    pub async fn handle(&self, key: &SessionKey) -> Result<SessionHandle> {
        if let Some(handle) = self.existing(key).await {
            return Ok(handle);
        }

        self.runner.ensure_session(key).await?;

        let mut sessions = self.sessions.write().await;
        let handle = sessions.entry(key.clone()).or_insert_with(|| {
            info!(session = %key, "Session created");
            Arc::new(Mutex::new(Session::new(key.clone())))
        });
        Ok(Arc::clone(handle))
    }

    /// Snapshot of the session for `key`, creating it if needed.
    pub async fn get_or_create(&self, key: &SessionKey) -> Result<Session> {
        let handle = self.handle(key).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Apply `f` to a working copy and commit only if it succeeds.
    pub async fn update<F>(&self, key: &SessionKey, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let handle = self.handle(key).await?;
        let mut session = handle.lock().await;
        let mut draft = session.clone();
        f(&mut draft)?;
        draft.touch();
        *session = draft;
        Ok(session.clone())
    }

    /// Drop a session and its runner conversation.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.write().await.remove(key).is_some();
        if removed {
            if let Err(e) = self.runner.reset(key).await {
                warn!(session = %key, error = %e, "Failed to reset runner conversation");
            }
            info!(session = %key, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle longer than `max_idle`. Sessions currently locked
    /// by an in-flight action are skipped. Returns how many were dropped.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let max_idle =
            chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - max_idle;

        let stale: Vec<SessionKey> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter_map(|(key, handle)| {
                    let session = handle.try_lock().ok()?;
                    (session.last_active_at < cutoff).then(|| key.clone())
                })
                .collect()
        };

        let mut pruned = 0;
        for key in stale {
            if self.remove(&key).await {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned, "Pruned idle sessions");
        } else {
            debug!("No idle sessions to prune");
        }
        pruned
    }
}

/// Spawn a background task that prunes idle sessions every `every`.
pub fn spawn_prune_task(
    store: Arc<SessionStore>,
    max_idle: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            store.prune_idle(max_idle).await;
        }
    })
}
