use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::services::auth::remote_jwks::KeySetError;

// Errors returned by identity-token verification.
//
// Every variant ends up as the same 401 at the HTTP layer; the distinction only
// exists for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported signing algorithm: {0:?}")]
    UnsupportedAlgorithm(jsonwebtoken::Algorithm),
    #[error("no key in the key set matches kid {0:?}")]
    NoMatchingKey(Option<String>),
    #[error(transparent)]
    KeySet(#[from] KeySetError),
    #[error("jwt verification failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("invalid claim '{0}'")]
    InvalidClaims(&'static str),
}

/// Identity token that passed signature, expiry and issuer checks.
///
/// `audience` keeps the order found in the token; `claims` is the whole
/// payload, left opaque until a caller asks for a typed view via [`claims`].
///
/// [`claims`]: VerifiedToken::claims
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub issuer: String,
    pub subject: Option<String>,
    pub audience: Vec<String>,
    pub expiry: Option<u64>,
    pub claims: Value,
}

impl VerifiedToken {
    /// Build a token from a decoded JWT payload.
    ///
    /// `aud` may be a single string or an array of strings; anything else is
    /// rejected.
    pub fn from_payload(claims: Value) -> Result<Self, VerifyError> {
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or(VerifyError::InvalidClaims("iss"))?
            .to_string();

        let subject = match claims.get("sub") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(VerifyError::InvalidClaims("sub")),
        };

        let audience = match claims.get("aud") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(VerifyError::InvalidClaims("aud"))?,
            Some(_) => return Err(VerifyError::InvalidClaims("aud")),
        };

        let expiry = claims.get("exp").and_then(Value::as_u64);

        Ok(Self {
            issuer,
            subject,
            audience,
            expiry,
            claims,
        })
    }

    /// Deserialize the claims payload into `T`.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.claims)
    }
}

/// Verifies a raw bearer assertion.
///
/// Implementations are shared by every request task, so they must be usable
/// through `&self` from many tasks at once. The returned future is dropped
/// when the client goes away; implementations must not rely on running to
/// completion.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError>;
}
