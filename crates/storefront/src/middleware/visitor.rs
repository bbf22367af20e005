//! Visitor extractor.
//!
//! Every API request belongs to a visitor. The cookie session holds only the
//! visitor token; the first request without one mints a token and the
//! session layer sets the cookie on the response.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use cardslawp_core::SessionId;

use crate::error::AppError;
use crate::models::session_keys;

/// The visitor token for this request.
///
/// # Example
///
/// ```rust,ignore
/// async fn show(State(state): State<AppState>, Visitor(id): Visitor) -> Result<Json<CartView>> {
///     let session = state.sessions().load(&id).await?;
///     // ...
/// }
/// ```
pub struct Visitor(pub SessionId);

impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Get the session from extensions (set by SessionManagerLayer)
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or_else(|| AppError::Internal("session layer missing".to_string()))?;

        let existing: Option<String> = session
            .get(session_keys::VISITOR_ID)
            .await
            .map_err(|e| AppError::Internal(format!("session read failed: {e}")))?;

        if let Some(token) = existing {
            return Ok(Self(SessionId::from_token(token)));
        }

        let id = SessionId::generate();
        session
            .insert(session_keys::VISITOR_ID, id.as_str())
            .await
            .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
        tracing::debug!("New visitor session");

        Ok(Self(id))
    }
}

/// Drop the visitor token and rotate the cookie session.
///
/// # Errors
///
/// Returns `AppError::Internal` if the session store fails.
pub async fn forget_visitor(session: &Session) -> Result<(), AppError> {
    session
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("session flush failed: {e}")))
}
