//! Request correlation middleware
//!
//! Every proxy request gets a [`RequestContext`] in its extensions and an
//! `x-request-id` response header. A caller-supplied UUID in the same header
//! is reused so ids can be propagated from upstream.

use crate::submitter::RequestContext;
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Header carrying the request id in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Attach a [`RequestContext`] to the request and echo its id
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(RequestContext { request_id });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
