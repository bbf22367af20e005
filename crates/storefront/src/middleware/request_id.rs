//! Request correlation ids.
//!
//! An upstream proxy may already have assigned an `x-request-id`; it is kept
//! when it looks sane, otherwise a UUID v4 is minted. The id lands on the
//! request span (declared by the `TraceLayer` span maker), on the Sentry
//! scope, and on the response.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Span;
use uuid::Uuid;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound id accepted verbatim.
const MAX_INBOUND_LEN: usize = 128;

/// Inbound id, if it is short printable ASCII. Anything else could smuggle
/// control characters into logs.
fn inbound_request_id(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?;
    let valid = !raw.is_empty()
        && raw.len() <= MAX_INBOUND_LEN
        && raw.bytes().all(|b| b.is_ascii_graphic());
    valid.then(|| raw.to_owned())
}

/// Attach a request id to the span, the Sentry scope, and the response.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id =
        inbound_request_id(request.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", request_id.as_str());
    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", &request_id);
    });

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
