//! Serialized access to visitor sessions.
//!
//! Every read-modify-write of a session (cart edits, verification flags,
//! checkout create and capture) holds that session's mutex, so two requests
//! from the same visitor never interleave. Different visitors never contend.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cardslawp_core::{SessionId, VisitorSession};

use crate::db::{RepositoryError, SessionRepository};

/// One async mutex per visitor token.
///
/// Locks for idle sessions are dropped after `idle`, matching session expiry.
#[derive(Clone)]
pub struct SessionLocks {
    locks: Cache<SessionId, Arc<Mutex<()>>>,
}

impl SessionLocks {
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        Self {
            locks: Cache::builder().time_to_idle(idle).build(),
        }
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(id.clone(), async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }
}

/// A session loaded under its lock. Call [`LockedSession::save`] to persist changes.
pub struct LockedSession {
    session: VisitorSession,
    repo: Arc<dyn SessionRepository>,
    _guard: OwnedMutexGuard<()>,
}

impl LockedSession {
    /// Write the session back while still holding the lock.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn save(&self) -> Result<(), RepositoryError> {
        self.repo.save(&self.session).await
    }
}

impl Deref for LockedSession {
    type Target = VisitorSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for LockedSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

/// Loads, locks, and destroys visitor sessions.
#[derive(Clone)]
pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    locks: SessionLocks,
}

impl SessionManager {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>, idle: Duration) -> Self {
        Self {
            repo,
            locks: SessionLocks::new(idle),
        }
    }

    /// Lock the session for `id`, creating an empty one on first contact.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn lock(&self, id: &SessionId) -> Result<LockedSession, RepositoryError> {
        let guard = self.locks.acquire(id).await;
        let session = self.load_or_new(id).await?;
        Ok(LockedSession {
            session,
            repo: Arc::clone(&self.repo),
            _guard: guard,
        })
    }

    /// Read-only snapshot of the session without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn load(&self, id: &SessionId) -> Result<VisitorSession, RepositoryError> {
        self.load_or_new(id).await
    }

    /// Delete the session. The visitor starts over on the next request.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn destroy(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let _guard = self.locks.acquire(id).await;
        self.repo.delete(id).await
    }

    async fn load_or_new(&self, id: &SessionId) -> Result<VisitorSession, RepositoryError> {
        Ok(self
            .repo
            .get(id)
            .await?
            .unwrap_or_else(|| VisitorSession::new(id.clone(), Utc::now())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardslawp_core::ProductId;

    use super::*;
    use crate::db::InMemorySessionRepository;

    fn manager() -> SessionManager {
        let idle = Duration::from_secs(60);
        SessionManager::new(Arc::new(InMemorySessionRepository::new(idle)), idle)
    }

    #[tokio::test]
    async fn test_changes_persist_only_after_save() {
        let manager = manager();
        let id = SessionId::generate();

        {
            let mut session = manager.lock(&id).await.unwrap();
            session.cart.add(ProductId::new("amazon-25"), 1).unwrap();
        }
        assert!(manager.load(&id).await.unwrap().cart.is_empty());

        {
            let mut session = manager.lock(&id).await.unwrap();
            session.cart.add(ProductId::new("amazon-25"), 1).unwrap();
            session.save().await.unwrap();
        }
        assert_eq!(manager.load(&id).await.unwrap().cart.total_quantity(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_serialize() {
        let manager = manager();
        let id = SessionId::generate();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let mut session = manager.lock(&id).await.unwrap();
                session.cart.add(ProductId::new("amazon-25"), 1).unwrap();
                tokio::task::yield_now().await;
                session.save().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(manager.load(&id).await.unwrap().cart.total_quantity(), 20);
    }

    #[tokio::test]
    async fn test_destroy_forgets_session() {
        let manager = manager();
        let id = SessionId::generate();
        {
            let mut session = manager.lock(&id).await.unwrap();
            session.cart.add(ProductId::new("amazon-25"), 3).unwrap();
            session.save().await.unwrap();
        }

        manager.destroy(&id).await.unwrap();
        assert!(manager.load(&id).await.unwrap().cart.is_empty());
    }
}
