//! Remote JWK set: fetch over HTTP, cache, refetch on demand.
//!
//! Nothing is fetched at construction time. The first verification (or an
//! explicit [`RemoteKeySet::refresh_after`]) populates the cache; afterwards a
//! refetch only happens when a token names a key we don't have, or when none of
//! the cached keys validates its signature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum KeySetError {
    #[error("failed to fetch key set: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("key set endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("key set contains no usable signing keys")]
    Empty,
}

/// Signing key taken from the remote set.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: Option<String>,
    pub key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("SigningKey").field("kid", &self.kid).finish()
    }
}

/// Snapshot of the cache. `generation` increases with every successful fetch.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    pub generation: u64,
    pub keys: Arc<Vec<SigningKey>>,
}

// Keys are parsed one by one so a single unsupported entry does not poison the
// whole set.
#[derive(Deserialize)]
struct RawJwkSet {
    keys: Vec<serde_json::Value>,
}

pub struct RemoteKeySet {
    jwks_url: String,
    http_client: reqwest::Client,
    keys: RwLock<Arc<Vec<SigningKey>>>,
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for RemoteKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteKeySet")
            .field("jwks_url", &self.jwks_url)
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish()
    }
}

impl RemoteKeySet {
    pub fn new(jwks_url: impl Into<String>, timeout: Duration) -> Result<Self, KeySetError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(jwks_url, http_client))
    }

    pub fn with_client(jwks_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http_client,
            keys: RwLock::new(Arc::new(Vec::new())),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    pub fn snapshot(&self) -> KeySnapshot {
        let keys = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        KeySnapshot {
            generation: self.generation.load(Ordering::Acquire),
            keys,
        }
    }

    /// Refetch the set unless someone already did so since `seen_generation`.
    ///
    /// Callers racing on the same stale generation share one fetch: the first
    /// one fetches, the rest wake up to the new snapshot.
    pub async fn refresh_after(&self, seen_generation: u64) -> Result<KeySnapshot, KeySetError> {
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != seen_generation {
            return Ok(self.snapshot());
        }

        let keys = Arc::new(self.fetch().await?);
        let count = keys.len();

        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        info!(url = %self.jwks_url, key_count = count, generation, "key set refreshed");

        Ok(self.snapshot())
    }

    async fn fetch(&self) -> Result<Vec<SigningKey>, KeySetError> {
        debug!(url = %self.jwks_url, "fetching key set");

        let response = self.http_client.get(&self.jwks_url).send().await?;
        if !response.status().is_success() {
            return Err(KeySetError::Status(response.status()));
        }

        let raw: RawJwkSet = response.json().await?;
        let keys = parse_signing_keys(raw.keys);

        if keys.is_empty() {
            return Err(KeySetError::Empty);
        }

        Ok(keys)
    }
}

fn parse_signing_keys(raw: Vec<serde_json::Value>) -> Vec<SigningKey> {
    let mut keys = Vec::with_capacity(raw.len());

    for value in raw {
        let jwk: Jwk = match serde_json::from_value(value) {
            Ok(jwk) => jwk,
            Err(e) => {
                warn!(error = %e, "unsupported JWK, skipping");
                continue;
            }
        };

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            continue;
        }

        let kid = jwk.common.key_id.clone();
        match DecodingKey::from_jwk(&jwk) {
            Ok(key) => keys.push(SigningKey { kid, key }),
            Err(e) => warn!(kid = ?kid, error = %e, "failed to load JWK, skipping"),
        }
    }

    keys
}
