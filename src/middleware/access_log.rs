//! Access log: one audit entry per request, queued after the response is built.
//!
//! The handler leaves the verified token (if any) in the response extensions.
//! This layer takes it out again so it never travels further up the stack, and
//! hands request metadata + final status + token to the audit queue.

use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
};

use crate::services::audit::{AuditEntry, RequestMeta};
use crate::services::auth::VerifiedToken;
use crate::state::AppState;

pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, access_log_middleware))
}

async fn access_log_middleware(
    State(state): State<AppState>,
    OriginalUri(original_uri): OriginalUri,
    req: Request<Body>,
    next: Next,
) -> Response {
    let meta = RequestMeta::new(req.method(), &original_uri, req.version(), req.headers());

    let mut response = next.run(req).await;

    // Status is final from here on; queueing never blocks or fails the request.
    let token = response.extensions_mut().remove::<VerifiedToken>();
    state
        .audit
        .record(AuditEntry::new(meta, response.status(), token));

    response
}
