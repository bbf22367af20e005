//! Orders recorded after a provider confirms payment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{OrderId, ProviderReference};
use super::money::{CurrencyCode, Money};
use super::session::SessionId;
use crate::pricing::{PricedCart, PricedLineItem, sum_lines};

/// Errors from order lifecycle transitions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

/// Order lifecycle status.
///
/// Transitions are one-way: `Created -> Captured` or `Created -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Captured,
    Failed,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Captured => "captured",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Captured | Self::Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "captured" => Ok(Self::Captured),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Which payment provider settled an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted checkout page; the buyer is redirected back afterwards.
    Stripe,
    /// Client-side approval followed by a server capture.
    PayPal,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::PayPal => "paypal",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::PayPal),
            other => Err(format!("unknown payment provider: {other}")),
        }
    }
}

/// A recorded order.
///
/// Lines and total are the price snapshot taken when the checkout was
/// created; they are never recomputed from the current catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "orderId")]
    pub id: OrderId,
    /// Verified email or phone of the buyer, when the session had one.
    pub buyer_identifier: Option<String>,
    pub lines: Vec<PricedLineItem>,
    pub total_minor_units: u64,
    pub currency: CurrencyCode,
    pub provider: ProviderKind,
    pub provider_reference: ProviderReference,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Session that created the checkout. Never leaves the server.
    #[serde(skip)]
    pub owner_session: Option<SessionId>,
}

impl Order {
    /// Start a new order in `Created` from a priced cart.
    #[must_use]
    pub fn new(
        priced: PricedCart,
        buyer_identifier: Option<String>,
        provider: ProviderKind,
        provider_reference: ProviderReference,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::generate(),
            buyer_identifier,
            lines: priced.lines,
            total_minor_units: priced.total_minor_units,
            currency: priced.currency,
            provider,
            provider_reference,
            status: OrderStatus::Created,
            failure_reason: None,
            created_at,
            owner_session: None,
        }
    }

    /// Bind the order to the session that created its checkout.
    #[must_use]
    pub fn owned_by(mut self, session: SessionId) -> Self {
        self.owner_session = Some(session);
        self
    }

    /// Whether `session` created this order's checkout. Orders without a
    /// recorded owner belong to nobody.
    #[must_use]
    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        self.owner_session.as_ref() == Some(session)
    }

    #[must_use]
    pub const fn total(&self) -> Money {
        Money::from_minor(self.total_minor_units, self.currency)
    }

    /// Move to `Captured`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] unless the order is `Created`.
    pub fn mark_captured(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Captured)
    }

    /// Move to `Failed`, recording why.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] unless the order is `Created`.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether the recorded total equals the sum of the recorded lines.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        sum_lines(&self.lines) == Some(self.total_minor_units)
    }
}
