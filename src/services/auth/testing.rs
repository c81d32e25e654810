//! Test doubles and fixtures for the auth service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{Router, extract::State, http::header, routing::get};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::Value;

use crate::services::auth::verifier::{TokenVerifier, VerifiedToken, VerifyError};
use crate::services::auth::{CERTS_PATH, id_token::VerifierPolicy};

pub const JWKS_FIXTURE: &str = include_str!("testdata/jwks.json");
pub const SIGNING_KEY_PEM: &str = include_str!("testdata/signing_key.pem");
// Same kid as the fixture set, different key pair.
pub const ROGUE_KEY_PEM: &str = include_str!("testdata/rogue_key.pem");
pub const FIXTURE_KID: &str = "test-key-1";

pub fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

pub fn sign(claims: &Value, key_pem: &str, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(key_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn policy(issuer: &str) -> VerifierPolicy {
    VerifierPolicy {
        issuer: issuer.to_string(),
        algorithms: vec![Algorithm::RS256],
        leeway_seconds: 0,
        nbf_leeway_seconds: 60,
    }
}

/// Local HTTP server that serves a fixed JWK set under the certs path and
/// counts how often it was fetched.
pub struct JwksServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct JwksServerState {
    body: Arc<String>,
    hits: Arc<AtomicUsize>,
}

impl JwksServer {
    pub async fn start(body: &str) -> Self {
        async fn certs(State(state): State<JwksServerState>) -> impl axum::response::IntoResponse {
            state.hits.fetch_add(1, Ordering::SeqCst);
            (
                [(header::CONTENT_TYPE, "application/json")],
                state.body.as_str().to_owned(),
            )
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let state = JwksServerState {
            body: Arc::new(body.to_string()),
            hits: hits.clone(),
        };
        let app = Router::new()
            .route(CERTS_PATH, get(certs))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, hits }
    }

    /// Issuer URL for tokens validated against this server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.base_url(), CERTS_PATH)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Verifier that accepts a fixed table of raw tokens.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, VerifiedToken>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, raw: &str, claims: Value) -> Self {
        let token = VerifiedToken::from_payload(claims).unwrap();
        self.tokens.insert(raw.to_string(), token);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| VerifyError::Malformed("unknown test token".into()))
    }
}
