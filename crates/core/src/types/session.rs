//! Visitor session state.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::cart::Cart;
use super::email::Email;
use super::phone::Phone;
use super::verification::{Channel, Identifier};

/// Opaque, unguessable visitor token (256 random bits).
///
/// `Debug` is redacted; the token is the visitor's credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token read back from the cookie session.
    #[must_use]
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId([REDACTED])")
    }
}

/// Per-visitor state: contact identifiers, verification flags, and cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorSession {
    #[serde(skip_serializing)]
    pub id: SessionId,
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub cart: Cart,
    pub created_at: DateTime<Utc>,
}

impl VisitorSession {
    #[must_use]
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: None,
            phone: None,
            email_verified: false,
            phone_verified: false,
            cart: Cart::default(),
            created_at: now,
        }
    }

    /// Record the email being verified. A different address clears the
    /// verified flag.
    pub fn set_email(&mut self, email: Email) {
        if self.email.as_ref() != Some(&email) {
            self.email_verified = false;
        }
        self.email = Some(email);
    }

    /// Record the phone being verified. A different number clears the
    /// verified flag.
    pub fn set_phone(&mut self, phone: Phone) {
        if self.phone.as_ref() != Some(&phone) {
            self.phone_verified = false;
        }
        self.phone = Some(phone);
    }

    /// The identifier a challenge on `channel` would be bound to.
    #[must_use]
    pub fn identifier_for(&self, channel: Channel) -> Option<Identifier> {
        match channel {
            Channel::Email => self.email.clone().map(Identifier::Email),
            Channel::Sms => self.phone.clone().map(Identifier::Phone),
        }
    }

    pub fn mark_verified(&mut self, channel: Channel) {
        match channel {
            Channel::Email => self.email_verified = true,
            Channel::Sms => self.phone_verified = true,
        }
    }

    /// The verified email, if any.
    #[must_use]
    pub fn verified_email(&self) -> Option<&Email> {
        self.email.as_ref().filter(|_| self.email_verified)
    }

    /// Identifier recorded on orders: verified email first, then verified phone.
    #[must_use]
    pub fn buyer_identifier(&self) -> Option<String> {
        if let Some(email) = self.verified_email() {
            return Some(email.to_string());
        }
        self.phone
            .as_ref()
            .filter(|_| self.phone_verified)
            .map(ToString::to_string)
    }
}
