//! Core types for CardsLawp.
//!
//! This module provides type-safe wrappers for the checkout domain.

pub mod cart;
pub mod email;
pub mod id;
pub mod money;
pub mod order;
pub mod phone;
pub mod product;
pub mod session;
pub mod verification;

pub use cart::{Cart, CartError, CartLine, CartLineInput};
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{CurrencyCode, Money, MoneyError};
pub use order::{Order, OrderError, OrderStatus, ProviderKind};
pub use phone::{Phone, PhoneError};
pub use product::Product;
pub use session::{SessionId, VisitorSession};
pub use verification::{Challenge, Channel, Identifier, VerificationCode};
