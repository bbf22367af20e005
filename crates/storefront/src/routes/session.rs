//! Session and verification route handlers.
//!
//! A visitor proves control of an email address or phone number by echoing
//! back a one-time code. Verified identifiers are attached to orders and gate
//! catalog administration.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use cardslawp_core::{Cart, Channel, Email, Identifier, Phone};

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{Visitor, forget_visitor};
use crate::services::IssueOutcome;
use crate::state::AppState;

/// What a visitor may see about their own session. Never includes the
/// token or any verification code.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub cart: Cart,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct SmsForm {
    pub phone: String,
}

#[derive(Deserialize)]
pub struct CodeForm {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct Verified {
    pub verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOut {
    pub logged_out: bool,
}

/// Current session state.
#[instrument(skip(state, visitor))]
pub async fn show(State(state): State<AppState>, visitor: Visitor) -> Result<Json<SessionView>> {
    let session = state.sessions().load(&visitor.0).await?;
    let is_admin = super::products::is_admin(&state, &session);

    Ok(Json(SessionView {
        email: session.email,
        phone: session.phone,
        email_verified: session.email_verified,
        phone_verified: session.phone_verified,
        cart: session.cart,
        is_admin,
    }))
}

/// Start email verification.
///
/// Records the address on the session and issues a code to it.
#[instrument(skip(state, visitor, form))]
pub async fn login(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<LoginForm>,
) -> Result<Json<IssueOutcome>> {
    let email = Email::parse(&form.email).map_err(|e| AppError::InvalidIdentifier(e.to_string()))?;

    {
        let mut session = state.sessions().lock(&visitor.0).await?;
        session.set_email(email.clone());
        session.save().await?;
    }

    let outcome = state
        .verification()
        .issue_challenge(Identifier::Email(email))
        .await?;
    Ok(Json(outcome))
}

/// Start phone verification.
#[instrument(skip(state, visitor, form))]
pub async fn send_sms(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<SmsForm>,
) -> Result<Json<IssueOutcome>> {
    let phone = Phone::parse(&form.phone).map_err(|e| AppError::InvalidIdentifier(e.to_string()))?;

    {
        let mut session = state.sessions().lock(&visitor.0).await?;
        session.set_phone(phone.clone());
        session.save().await?;
    }

    let outcome = state
        .verification()
        .issue_challenge(Identifier::Phone(phone))
        .await?;
    Ok(Json(outcome))
}

async fn verify(
    state: &AppState,
    visitor: &Visitor,
    channel: Channel,
    code: &str,
) -> Result<Json<Verified>> {
    let mut session = state.sessions().lock(&visitor.0).await?;
    state
        .verification()
        .verify(&mut session, channel, code)
        .await?;
    session.save().await?;

    if let Some(subject) = session.identifier_for(channel) {
        set_sentry_user(&subject.masked());
    }
    Ok(Json(Verified { verified: true }))
}

/// Submit the emailed code.
#[instrument(skip(state, visitor, form))]
pub async fn verify_email(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<CodeForm>,
) -> Result<Json<Verified>> {
    verify(&state, &visitor, Channel::Email, form.code.trim()).await
}

/// Submit the texted code.
#[instrument(skip(state, visitor, form))]
pub async fn verify_phone(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<CodeForm>,
) -> Result<Json<Verified>> {
    verify(&state, &visitor, Channel::Sms, form.code.trim()).await
}

/// Forget the visitor: drops identifiers, verification flags, and cart.
#[instrument(skip(state, visitor, session))]
pub async fn logout(
    State(state): State<AppState>,
    visitor: Visitor,
    session: Session,
) -> Result<Json<LoggedOut>> {
    state.sessions().destroy(&visitor.0).await?;
    forget_visitor(&session).await?;
    clear_sentry_user();

    tracing::info!("Visitor logged out");
    Ok(Json(LoggedOut { logged_out: true }))
}
