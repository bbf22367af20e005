//! Business logic services.
//!
//! - [`checkout`] - Create and capture payments, record orders
//! - [`verification`] - Issue and check one-time codes
//! - [`delivery`] - Send codes by email (SMTP) or SMS (Twilio)
//! - [`sessions`] - Per-visitor locking around session read-modify-write

pub mod checkout;
pub mod delivery;
pub mod sessions;
pub mod verification;

pub use checkout::{CheckoutCreated, CheckoutError, CheckoutService, CheckoutSettings, CreateCheckout};
pub use delivery::{CodeSender, DeliveryError, SmtpEmailSender, TwilioSmsSender};
pub use sessions::{LockedSession, SessionLocks, SessionManager};
pub use verification::{IssueOutcome, VerificationError, VerificationService};
