//! Visitor session storage.
//!
//! The cookie only carries the visitor token; the session body (contact
//! details, verification flags, cart) lives here, keyed by that token.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use cardslawp_core::{SessionId, VisitorSession};

use super::RepositoryError;

/// Storage for [`VisitorSession`] records.
///
/// Callers serialize read-modify-write through
/// [`SessionLocks`](crate::services::sessions::SessionLocks); the repository
/// itself only guarantees single-operation atomicity.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Option<VisitorSession>, RepositoryError>;

    async fn save(&self, session: &VisitorSession) -> Result<(), RepositoryError>;

    async fn delete(&self, id: &SessionId) -> Result<(), RepositoryError>;
}

/// Sessions held in a `moka` cache that drops idle visitors.
#[derive(Clone)]
pub struct InMemorySessionRepository {
    sessions: Cache<SessionId, VisitorSession>,
}

impl InMemorySessionRepository {
    /// Create a store that forgets sessions untouched for `idle`.
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(idle)
            .build();
        Self { sessions }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Option<VisitorSession>, RepositoryError> {
        Ok(self.sessions.get(id).await)
    }

    async fn save(&self, session: &VisitorSession) -> Result<(), RepositoryError> {
        self.sessions
            .insert(session.id.clone(), session.clone())
            .await;
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), RepositoryError> {
        self.sessions.invalidate(id).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_save_get_delete() {
        let repo = InMemorySessionRepository::new(Duration::from_secs(60));
        let session = VisitorSession::new(SessionId::generate(), Utc::now());

        assert!(repo.get(&session.id).await.unwrap().is_none());

        repo.save(&session).await.unwrap();
        let loaded = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.created_at, session.created_at);

        repo.delete(&session.id).await.unwrap();
        assert!(repo.get(&session.id).await.unwrap().is_none());
    }
}
