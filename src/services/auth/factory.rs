/// Factory: build the identity-token verifier from application `Config`.
use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::services::auth::{IdTokenVerifier, RemoteKeySet, VerifierPolicy};

pub fn build_verifier(config: &Config) -> Result<Arc<IdTokenVerifier>, AppError> {
    let key_set = RemoteKeySet::new(config.jwks_url(), config.jwks_timeout)?;

    let policy = VerifierPolicy {
        issuer: config.issuer.clone(),
        algorithms: config.signing_algorithms.clone(),
        leeway_seconds: config.leeway_seconds,
        nbf_leeway_seconds: config.nbf_leeway_seconds,
    };

    Ok(Arc::new(IdTokenVerifier::new(Arc::new(key_set), policy)))
}
