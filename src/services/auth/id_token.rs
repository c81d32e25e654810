use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode_header, get_current_timestamp};
use serde_json::Value;

use crate::services::auth::remote_jwks::{RemoteKeySet, SigningKey};
use crate::services::auth::verifier::{TokenVerifier, VerifiedToken, VerifyError};

/// What a token must satisfy besides a valid signature.
#[derive(Debug, Clone)]
pub struct VerifierPolicy {
    pub issuer: String,
    pub algorithms: Vec<Algorithm>,
    /// Applied to `exp`.
    pub leeway_seconds: u64,
    /// Applied to `nbf` only.
    pub nbf_leeway_seconds: u64,
}

/// Outcome of trying a set of candidate keys.
enum Attempt {
    Verified(VerifiedToken),
    // Signature checked out but the token was rejected (expired, wrong issuer, ...).
    Rejected(VerifyError),
    // No candidate key produced a valid signature.
    NoKey(Option<jsonwebtoken::errors::Error>),
}

/// Identity-token verifier backed by a [`RemoteKeySet`].
///
/// Checks signature, `exp`, `nbf` and `iss`. The audience is deliberately left
/// alone: access is scoped per resource by the caller.
pub struct IdTokenVerifier {
    key_set: Arc<RemoteKeySet>,
    allowed: Vec<Algorithm>,
    validation: Validation,
    nbf_leeway: u64,
}

impl std::fmt::Debug for IdTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenVerifier")
            .field("key_set", &self.key_set)
            .field("allowed", &self.allowed)
            .field("validation", &self.validation)
            .field("nbf_leeway", &self.nbf_leeway)
            .finish()
    }
}

impl IdTokenVerifier {
    pub fn new(key_set: Arc<RemoteKeySet>, policy: VerifierPolicy) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[policy.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_aud = false;
        // jsonwebtoken has one leeway for both; nbf is checked separately.
        validation.validate_nbf = false;
        validation.leeway = policy.leeway_seconds;

        Self {
            key_set,
            allowed: policy.algorithms,
            validation,
            nbf_leeway: policy.nbf_leeway_seconds,
        }
    }

    pub fn key_set(&self) -> Arc<RemoteKeySet> {
        self.key_set.clone()
    }

    fn try_keys(
        &self,
        token: &str,
        alg: Algorithm,
        kid: Option<&str>,
        keys: &[SigningKey],
    ) -> Attempt {
        // jsonwebtoken insists every algorithm in the validation shares the key's
        // family, so pin it to the one the header announced.
        let mut validation = self.validation.clone();
        validation.algorithms = vec![alg];

        let mut last_err = None;

        for candidate in keys
            .iter()
            .filter(|k| kid.is_none() || k.kid.as_deref() == kid)
        {
            match jsonwebtoken::decode::<Value>(token, &candidate.key, &validation) {
                Ok(data) => {
                    if let Err(e) = self.check_not_before(&data.claims) {
                        return Attempt::Rejected(e);
                    }
                    return match VerifiedToken::from_payload(data.claims) {
                        Ok(verified) => Attempt::Verified(verified),
                        Err(e) => Attempt::Rejected(e),
                    };
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm
                    ) =>
                {
                    last_err = Some(e);
                }
                Err(e) => return Attempt::Rejected(e.into()),
            }
        }

        Attempt::NoKey(last_err)
    }

    fn check_not_before(&self, claims: &Value) -> Result<(), VerifyError> {
        let nbf = match claims.get("nbf") {
            None | Some(Value::Null) => return Ok(()),
            Some(v) => v.as_f64().ok_or(VerifyError::InvalidClaims("nbf"))?,
        };

        if nbf > (get_current_timestamp() + self.nbf_leeway) as f64 {
            return Err(VerifyError::Token(ErrorKind::ImmatureSignature.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for IdTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError> {
        let header = decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;

        if !self.allowed.contains(&header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm(header.alg));
        }

        let kid = header.kid.as_deref();

        let snapshot = self.key_set.snapshot();
        match self.try_keys(token, header.alg, kid, &snapshot.keys) {
            Attempt::Verified(verified) => return Ok(verified),
            Attempt::Rejected(e) => return Err(e),
            Attempt::NoKey(_) => {}
        }

        // Unknown kid or a signature none of the cached keys accepts: the
        // provider may have rotated keys, so look once more.
        let snapshot = self.key_set.refresh_after(snapshot.generation).await?;
        match self.try_keys(token, header.alg, kid, &snapshot.keys) {
            Attempt::Verified(verified) => Ok(verified),
            Attempt::Rejected(e) => Err(e),
            Attempt::NoKey(Some(e)) => Err(e.into()),
            Attempt::NoKey(None) => Err(VerifyError::NoMatchingKey(header.kid.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::testing::{
        FIXTURE_KID, JWKS_FIXTURE, JwksServer, ROGUE_KEY_PEM, SIGNING_KEY_PEM, now, policy, sign,
    };
    use serde_json::json;
    use std::time::Duration;

    async fn verifier_for(server: &JwksServer) -> IdTokenVerifier {
        let key_set = RemoteKeySet::new(server.jwks_url(), Duration::from_secs(5)).unwrap();
        IdTokenVerifier::new(Arc::new(key_set), policy(&server.base_url()))
    }

    #[tokio::test]
    async fn accepts_valid_token_and_keeps_audience_order() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({
                "iss": server.base_url(),
                "aud": ["app-b", "app-a"],
                "sub": "user-1",
                "exp": now() + 300,
                "email": "j@x.com"
            }),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified.issuer, server.base_url());
        assert_eq!(verified.audience, vec!["app-b", "app-a"]);
        assert_eq!(verified.subject.as_deref(), Some("user-1"));
        assert_eq!(verified.claims["email"], "j@x.com");
    }

    #[tokio::test]
    async fn caches_keys_between_verifications() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        verifier.verify(&token).await.unwrap();
        verifier.verify(&token).await.unwrap();
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn token_without_kid_tries_every_key() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            None,
        );

        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_expired_token_without_refetching() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() - 600}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(
            matches!(&err, VerifyError::Token(e) if matches!(e.kind(), ErrorKind::ExpiredSignature))
        );
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn tolerates_small_nbf_skew_only() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let skewed = sign(
            &json!({
                "iss": server.base_url(),
                "aud": "app-a",
                "exp": now() + 300,
                "nbf": now() + 30
            }),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );
        assert!(verifier.verify(&skewed).await.is_ok());

        let early = sign(
            &json!({
                "iss": server.base_url(),
                "aud": "app-a",
                "exp": now() + 300,
                "nbf": now() + 600
            }),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );
        let err = verifier.verify(&early).await.unwrap_err();
        assert!(
            matches!(&err, VerifyError::Token(e) if matches!(e.kind(), ErrorKind::ImmatureSignature))
        );
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn expiry_gets_no_skew_by_default() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() - 30}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn rejects_wrong_issuer() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": "https://evil.example.com", "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(
            matches!(&err, VerifyError::Token(e) if matches!(e.kind(), ErrorKind::InvalidIssuer))
        );
    }

    #[tokio::test]
    async fn rejects_missing_expiry() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a"}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn bad_signature_refetches_once_then_fails() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let good = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );
        verifier.verify(&good).await.unwrap();
        assert_eq!(server.hits(), 1);

        let forged = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            ROGUE_KEY_PEM,
            Some(FIXTURE_KID),
        );
        let err = verifier.verify(&forged).await.unwrap_err();
        assert!(
            matches!(&err, VerifyError::Token(e) if matches!(e.kind(), ErrorKind::InvalidSignature))
        );
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn unknown_kid_is_no_matching_key() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some("rotated-away"),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::NoMatchingKey(Some(kid)) if kid == "rotated-away"));
    }

    #[tokio::test]
    async fn rejects_disallowed_algorithm_before_fetching() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let key_set = RemoteKeySet::new(server.jwks_url(), Duration::from_secs(5)).unwrap();
        let mut only_es = policy(&server.base_url());
        only_es.algorithms = vec![Algorithm::ES256];
        let verifier = IdTokenVerifier::new(Arc::new(key_set), only_es);

        let token = sign(
            &json!({"iss": server.base_url(), "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnsupportedAlgorithm(Algorithm::RS256)));
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let server = JwksServer::start(JWKS_FIXTURE).await;
        let verifier = verifier_for(&server).await;

        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, VerifyError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_key_set_fails_verification() {
        // Bind and immediately drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let issuer = format!("http://{addr}");
        let key_set = RemoteKeySet::new(
            format!("{issuer}{}", crate::services::auth::CERTS_PATH),
            Duration::from_secs(2),
        )
        .unwrap();
        let verifier = IdTokenVerifier::new(Arc::new(key_set), policy(&issuer));

        let token = sign(
            &json!({"iss": issuer, "aud": "app-a", "exp": now() + 300}),
            SIGNING_KEY_PEM,
            Some(FIXTURE_KID),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::KeySet(_)));
    }
}
