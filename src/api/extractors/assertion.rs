use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::{HeaderName, request::Parts};

/// Header the access provider puts the signed identity token in.
pub const ASSERTION_HEADER: HeaderName = HeaderName::from_static("cf-access-jwt-assertion");

/// Raw bearer assertion, if the request carries a usable one.
///
/// Never rejects: an absent, empty or non-text header yields `None` and the
/// decision path turns that into a denial.
#[derive(Debug, Clone)]
pub struct AccessAssertion(pub Option<String>);

impl<S> FromRequestParts<S> for AccessAssertion
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(&ASSERTION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(AccessAssertion(token))
    }
}
