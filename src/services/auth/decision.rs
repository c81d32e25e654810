//! Access decision for one request.
//!
//! Every failure (no assertion, failed verification, audience miss) collapses
//! into the same 401 so the response never tells a caller which check failed.

use axum::{
    Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::services::auth::{
    audience,
    verifier::{TokenVerifier, VerifiedToken},
};

#[derive(Debug, Clone)]
pub enum Decision {
    Granted(VerifiedToken),
    // Carries the token when it verified but was not scoped for the resource.
    Denied(Option<VerifiedToken>),
}

impl Decision {
    pub fn status(&self) -> StatusCode {
        match self {
            Decision::Granted(_) => StatusCode::OK,
            Decision::Denied(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn into_token(self) -> Option<VerifiedToken> {
        match self {
            Decision::Granted(token) => Some(token),
            Decision::Denied(token) => token,
        }
    }
}

/// Status-only response. The token (if any) rides along in the response
/// extensions for the access log and never reaches the wire.
impl IntoResponse for Decision {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.into_token() {
            Some(token) => (status, Extension(token)).into_response(),
            None => status.into_response(),
        }
    }
}

pub async fn decide(verifier: &dyn TokenVerifier, assertion: Option<&str>, path: &str) -> Decision {
    let Some(raw) = assertion.filter(|s| !s.is_empty()) else {
        return Decision::Denied(None);
    };

    let token = match verifier.verify(raw).await {
        Ok(token) => token,
        Err(err) => {
            debug!(error = %err, "identity token verification failed");
            return Decision::Denied(None);
        }
    };

    let resource = audience::resource_id(path);
    if audience::matches(&token.audience, &resource) {
        debug!(
            iss = %token.issuer,
            sub = ?token.subject,
            exp = ?token.expiry,
            resource = %resource,
            "access granted"
        );
        Decision::Granted(token)
    } else {
        debug!(resource = %resource, audience = ?token.audience, "token not scoped for resource");
        Decision::Denied(Some(token))
    }
}
