//! One-time code verification for email addresses and phone numbers.
//!
//! Per identifier: `NoChallenge -> Pending -> Consumed | Expired`. Issuing
//! again replaces the pending code. Expiry is checked when a code is
//! submitted, not by a background sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use cardslawp_core::{Challenge, Channel, Identifier, VisitorSession};

use super::delivery::{CodeSender, DeliveryError};
use crate::db::{ChallengeRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum VerificationError {
    /// Wrong, expired, consumed, or never issued.
    #[error("invalid or expired verification code")]
    InvalidCode,

    #[error("no delivery channel configured for {0}")]
    DeliveryUnavailable(Channel),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result of issuing a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueOutcome {
    /// Whether the code went out over a delivery channel.
    pub sent: bool,
    /// The code itself, only when no channel exists and exposure is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone)]
pub struct VerificationService {
    challenges: Arc<dyn ChallengeRepository>,
    email: Option<Arc<dyn CodeSender>>,
    sms: Option<Arc<dyn CodeSender>>,
    ttl: chrono::Duration,
    expose_codes: bool,
}

impl VerificationService {
    #[must_use]
    pub fn new(challenges: Arc<dyn ChallengeRepository>, ttl: Duration, expose_codes: bool) -> Self {
        Self {
            challenges,
            email: None,
            sms: None,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10)),
            expose_codes,
        }
    }

    /// Register `sender` for the channel it reports.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn CodeSender>) -> Self {
        match sender.channel() {
            Channel::Email => self.email = Some(sender),
            Channel::Sms => self.sms = Some(sender),
        }
        self
    }

    fn sender(&self, channel: Channel) -> Option<&Arc<dyn CodeSender>> {
        match channel {
            Channel::Email => self.email.as_ref(),
            Channel::Sms => self.sms.as_ref(),
        }
    }

    /// Issue a fresh code for `subject`, invalidating any pending one.
    ///
    /// # Errors
    ///
    /// - `DeliveryUnavailable` if there is no sender for the channel and codes
    ///   may not be exposed
    /// - `Delivery` if the sender fails
    #[instrument(skip(self, subject), fields(subject = %subject.masked()))]
    pub async fn issue_challenge(
        &self,
        subject: Identifier,
    ) -> Result<IssueOutcome, VerificationError> {
        let channel = subject.channel();
        let sender = self.sender(channel);
        if sender.is_none() && !self.expose_codes {
            tracing::warn!(%channel, "Verification requested with no delivery channel");
            return Err(VerificationError::DeliveryUnavailable(channel));
        }

        let challenge = Challenge::issue(subject, Utc::now());
        let code = challenge.code.clone();
        let subject = challenge.subject.clone();
        self.challenges.put(challenge).await?;

        match sender {
            Some(sender) => {
                if let Err(e) = sender.send(&subject, &code).await {
                    self.challenges.remove(&subject).await?;
                    return Err(e.into());
                }
                Ok(IssueOutcome {
                    sent: true,
                    code: None,
                })
            }
            None => {
                tracing::info!(%channel, "Verification code returned to caller");
                Ok(IssueOutcome {
                    sent: false,
                    code: Some(code.as_str().to_owned()),
                })
            }
        }
    }

    /// Check `submitted` against the live challenge for the session's
    /// identifier on `channel`, and mark that channel verified on success.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCode` when the session has no identifier for the
    /// channel, or the code is wrong, expired, or already used.
    #[instrument(skip(self, session, submitted))]
    pub async fn verify(
        &self,
        session: &mut VisitorSession,
        channel: Channel,
        submitted: &str,
    ) -> Result<(), VerificationError> {
        let subject = session
            .identifier_for(channel)
            .ok_or(VerificationError::InvalidCode)?;

        let consumed = self
            .challenges
            .consume(&subject, submitted, Utc::now(), self.ttl)
            .await?;
        if !consumed {
            tracing::info!(subject = %subject.masked(), "Verification code rejected");
            return Err(VerificationError::InvalidCode);
        }

        session.mark_verified(channel);
        tracing::info!(subject = %subject.masked(), "Identifier verified");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cardslawp_core::{Email, Phone, SessionId, VerificationCode};

    use super::*;
    use crate::db::InMemoryChallengeRepository;

    /// Records the last code it was asked to send.
    #[derive(Default)]
    struct RecordingSender {
        last: Mutex<Option<String>>,
    }

    impl RecordingSender {
        fn last_code(&self) -> String {
            self.last.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl CodeSender for RecordingSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _to: &Identifier, code: &VerificationCode) -> Result<(), DeliveryError> {
            *self.last.lock().unwrap() = Some(code.as_str().to_owned());
            Ok(())
        }
    }

    /// Records the code, then reports a provider failure.
    #[derive(Default)]
    struct FailingSender {
        attempted: Mutex<Option<String>>,
    }

    #[async_trait]
    impl CodeSender for FailingSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _to: &Identifier, code: &VerificationCode) -> Result<(), DeliveryError> {
            *self.attempted.lock().unwrap() = Some(code.as_str().to_owned());
            Err(DeliveryError::Api {
                status: 503,
                message: "unavailable".to_owned(),
            })
        }
    }

    fn email() -> Email {
        Email::parse("buyer@example.com").unwrap()
    }

    fn session_with_email() -> VisitorSession {
        let mut session = VisitorSession::new(SessionId::generate(), Utc::now());
        session.set_email(email());
        session
    }

    fn service(sender: &Arc<RecordingSender>) -> VerificationService {
        VerificationService::new(
            Arc::new(InMemoryChallengeRepository::new()),
            Duration::from_secs(600),
            false,
        )
        .with_sender(Arc::clone(sender) as Arc<dyn CodeSender>)
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let sender = Arc::new(RecordingSender::default());
        let service = service(&sender);
        let mut session = session_with_email();

        let outcome = service
            .issue_challenge(Identifier::Email(email()))
            .await
            .unwrap();
        assert!(outcome.sent);
        assert!(outcome.code.is_none());

        service
            .verify(&mut session, Channel::Email, &sender.last_code())
            .await
            .unwrap();
        assert!(session.email_verified);
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_code() {
        let sender = Arc::new(RecordingSender::default());
        let service = service(&sender);
        let mut session = session_with_email();

        service.issue_challenge(Identifier::Email(email())).await.unwrap();
        let first = sender.last_code();
        service.issue_challenge(Identifier::Email(email())).await.unwrap();
        let second = sender.last_code();

        if first != second {
            let result = service.verify(&mut session, Channel::Email, &first).await;
            assert!(matches!(result, Err(VerificationError::InvalidCode)));
            assert!(!session.email_verified);
        }
        service
            .verify(&mut session, Channel::Email, &second)
            .await
            .unwrap();
        assert!(session.email_verified);
    }

    #[tokio::test]
    async fn test_code_cannot_be_reused() {
        let sender = Arc::new(RecordingSender::default());
        let service = service(&sender);
        let mut session = session_with_email();

        service.issue_challenge(Identifier::Email(email())).await.unwrap();
        let code = sender.last_code();
        service.verify(&mut session, Channel::Email, &code).await.unwrap();

        let mut other = session_with_email();
        let result = service.verify(&mut other, Channel::Email, &code).await;
        assert!(matches!(result, Err(VerificationError::InvalidCode)));
        assert!(!other.email_verified);
    }

    #[tokio::test]
    async fn test_expired_code_fails() {
        let sender = Arc::new(RecordingSender::default());
        let service = VerificationService::new(
            Arc::new(InMemoryChallengeRepository::new()),
            Duration::ZERO,
            false,
        )
        .with_sender(Arc::clone(&sender) as Arc<dyn CodeSender>);
        let mut session = session_with_email();

        service.issue_challenge(Identifier::Email(email())).await.unwrap();
        let result = service
            .verify(&mut session, Channel::Email, &sender.last_code())
            .await;
        assert!(matches!(result, Err(VerificationError::InvalidCode)));
    }

    #[tokio::test]
    async fn test_missing_channel_without_exposure() {
        let service = VerificationService::new(
            Arc::new(InMemoryChallengeRepository::new()),
            Duration::from_secs(600),
            false,
        );
        let phone = Identifier::Phone(Phone::parse("+15551234567").unwrap());
        let result = service.issue_challenge(phone).await;
        assert!(matches!(
            result,
            Err(VerificationError::DeliveryUnavailable(Channel::Sms))
        ));
    }

    #[tokio::test]
    async fn test_missing_channel_with_exposure_returns_code() {
        let service = VerificationService::new(
            Arc::new(InMemoryChallengeRepository::new()),
            Duration::from_secs(600),
            true,
        );
        let phone = Phone::parse("+15551234567").unwrap();
        let outcome = service
            .issue_challenge(Identifier::Phone(phone.clone()))
            .await
            .unwrap();
        assert!(!outcome.sent);

        let mut session = VisitorSession::new(SessionId::generate(), Utc::now());
        session.set_phone(phone);
        service
            .verify(&mut session, Channel::Sms, &outcome.code.unwrap())
            .await
            .unwrap();
        assert!(session.phone_verified);
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_no_challenge() {
        let challenges = Arc::new(InMemoryChallengeRepository::new());
        let sender = Arc::new(FailingSender::default());
        let service = VerificationService::new(
            Arc::clone(&challenges) as Arc<dyn ChallengeRepository>,
            Duration::from_secs(600),
            false,
        )
        .with_sender(Arc::clone(&sender) as Arc<dyn CodeSender>);

        let result = service.issue_challenge(Identifier::Email(email())).await;
        assert!(matches!(result, Err(VerificationError::Delivery(_))));

        let code = sender.attempted.lock().unwrap().clone().unwrap();
        let consumed = challenges
            .consume(
                &Identifier::Email(email()),
                &code,
                Utc::now(),
                chrono::Duration::minutes(10),
            )
            .await
            .unwrap();
        assert!(!consumed);
    }

    #[tokio::test]
    async fn test_verify_without_identifier_is_invalid() {
        let sender = Arc::new(RecordingSender::default());
        let service = service(&sender);
        let mut session = VisitorSession::new(SessionId::generate(), Utc::now());
        let result = service.verify(&mut session, Channel::Email, "123456").await;
        assert!(matches!(result, Err(VerificationError::InvalidCode)));
    }
}
