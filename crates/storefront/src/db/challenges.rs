//! Live verification challenges, one per identifier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use cardslawp_core::{Challenge, Identifier};

use super::RepositoryError;

/// Storage for verification challenges.
#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    /// Store `challenge`, replacing any live challenge for the same identifier.
    async fn put(&self, challenge: Challenge) -> Result<(), RepositoryError>;

    /// Atomically check `submitted` against the live challenge for `subject`.
    ///
    /// Returns `true` and removes the challenge on a match. An expired
    /// challenge is removed and treated as absent. A mismatch leaves the
    /// challenge in place.
    async fn consume(
        &self,
        subject: &Identifier,
        submitted: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, RepositoryError>;

    /// Drop any live challenge for `subject`.
    async fn remove(&self, subject: &Identifier) -> Result<(), RepositoryError>;
}

#[derive(Default, Clone)]
pub struct InMemoryChallengeRepository {
    challenges: Arc<RwLock<HashMap<String, Challenge>>>,
}

impl InMemoryChallengeRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeRepository for InMemoryChallengeRepository {
    async fn put(&self, challenge: Challenge) -> Result<(), RepositoryError> {
        let mut challenges = self.challenges.write().await;
        challenges.insert(challenge.subject.key(), challenge);
        Ok(())
    }

    async fn consume(
        &self,
        subject: &Identifier,
        submitted: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let key = subject.key();
        let mut challenges = self.challenges.write().await;

        let Some(challenge) = challenges.get(&key) else {
            return Ok(false);
        };

        if challenge.is_expired(now, ttl) {
            challenges.remove(&key);
            return Ok(false);
        }

        if !challenge.matches(submitted) {
            return Ok(false);
        }

        challenges.remove(&key);
        Ok(true)
    }

    async fn remove(&self, subject: &Identifier) -> Result<(), RepositoryError> {
        self.challenges.write().await.remove(&subject.key());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardslawp_core::Email;

    use super::*;

    fn subject() -> Identifier {
        Identifier::Email(Email::parse("buyer@example.com").unwrap())
    }

    #[tokio::test]
    async fn test_match_consumes_challenge() {
        let repo = InMemoryChallengeRepository::new();
        let now = Utc::now();
        let challenge = Challenge::issue(subject(), now);
        let code = challenge.code.as_str().to_owned();
        repo.put(challenge).await.unwrap();

        let ttl = Duration::minutes(10);
        assert!(repo.consume(&subject(), &code, now, ttl).await.unwrap());
        assert!(!repo.consume(&subject(), &code, now, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_mismatch_keeps_challenge_live() {
        let repo = InMemoryChallengeRepository::new();
        let now = Utc::now();
        let challenge = Challenge::issue(subject(), now);
        let code = challenge.code.as_str().to_owned();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        repo.put(challenge).await.unwrap();

        let ttl = Duration::minutes(10);
        assert!(!repo.consume(&subject(), wrong, now, ttl).await.unwrap());
        assert!(repo.consume(&subject(), &code, now, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_challenge_is_absent() {
        let repo = InMemoryChallengeRepository::new();
        let issued = Utc::now();
        let challenge = Challenge::issue(subject(), issued);
        let code = challenge.code.as_str().to_owned();
        repo.put(challenge).await.unwrap();

        let ttl = Duration::minutes(10);
        let later = issued + Duration::minutes(11);
        assert!(!repo.consume(&subject(), &code, later, ttl).await.unwrap());
        assert!(!repo.consume(&subject(), &code, issued, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_drops_challenge() {
        let repo = InMemoryChallengeRepository::new();
        let now = Utc::now();
        let challenge = Challenge::issue(subject(), now);
        let code = challenge.code.as_str().to_owned();
        repo.put(challenge).await.unwrap();

        repo.remove(&subject()).await.unwrap();
        let ttl = Duration::minutes(10);
        assert!(!repo.consume(&subject(), &code, now, ttl).await.unwrap());
    }
}
