//! One-time verification codes bound to an email address or phone number.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::phone::Phone;

/// Delivery channel of a challenge, and the session flag it sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Email => "email",
            Self::Sms => "sms",
        })
    }
}

/// The subject a challenge is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Identifier {
    Email(Email),
    Phone(Phone),
}

impl Identifier {
    /// Storage key; at most one live challenge exists per key.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Email(email) => format!("email:{email}"),
            Self::Phone(phone) => format!("phone:{phone}"),
        }
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Phone(_) => Channel::Sms,
        }
    }

    /// Log-safe rendering.
    #[must_use]
    pub fn masked(&self) -> String {
        match self {
            Self::Email(email) => email.masked(),
            Self::Phone(phone) => phone.masked(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email(email) => email.fmt(f),
            Self::Phone(phone) => phone.fmt(f),
        }
    }
}

/// A 6-digit numeric one-time code.
///
/// `Debug` is redacted so codes never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub const LENGTH: usize = 6;

    /// Generate a code from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let n: u32 = rand::rng().random_range(0..1_000_000);
        Self(format!("{n:06}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a submitted code without short-circuiting on the
    /// first differing byte.
    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), submitted.trim().as_bytes())
    }
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerificationCode([REDACTED])")
    }
}

#[cfg(test)]
impl From<&str> for VerificationCode {
    fn from(code: &str) -> Self {
        Self(code.to_owned())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// A live challenge for one identifier.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub subject: Identifier,
    pub code: VerificationCode,
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    /// Issue a fresh challenge with a random code.
    #[must_use]
    pub fn issue(subject: Identifier, now: DateTime<Utc>) -> Self {
        Self {
            subject,
            code: VerificationCode::generate(),
            issued_at: now,
        }
    }

    /// A challenge is expired once `ttl` has fully elapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at >= ttl
    }

    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        self.code.matches(submitted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = VerificationCode::generate();
            assert_eq!(code.as_str().len(), VerificationCode::LENGTH);
            assert!(code.as_str().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_debug_is_redacted() {
        let code = VerificationCode::from("123456");
        assert!(!format!("{code:?}").contains("123456"));
    }

    #[test]
    fn test_matches() {
        let code = VerificationCode::from("012345");
        assert!(code.matches("012345"));
        assert!(code.matches(" 012345 "));
        assert!(!code.matches("12345"));
        assert!(!code.matches("012346"));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let challenge = Challenge {
            subject: Identifier::Email(Email::parse("a@example.com").unwrap()),
            code: VerificationCode::from("000000"),
            issued_at: now,
        };
        let ttl = Duration::minutes(10);
        assert!(!challenge.is_expired(now + Duration::minutes(9), ttl));
        assert!(challenge.is_expired(now + ttl, ttl));
    }

    #[test]
    fn test_identifier_keys_are_distinct_per_kind() {
        let email = Identifier::Email(Email::parse("a@example.com").unwrap());
        let phone = Identifier::Phone(Phone::parse("+15551234567").unwrap());
        assert_eq!(email.key(), "email:a@example.com");
        assert_eq!(phone.key(), "phone:+15551234567");
        assert_eq!(email.channel(), Channel::Email);
        assert_eq!(phone.channel(), Channel::Sms);
    }
}
