pub mod audience;
pub mod decision;
pub mod factory;
pub mod id_token;
pub mod remote_jwks;
pub mod verifier;

#[cfg(test)]
pub mod testing;

pub use decision::{Decision, decide};
pub use factory::build_verifier;
pub use id_token::{IdTokenVerifier, VerifierPolicy};
pub use remote_jwks::RemoteKeySet;
pub use verifier::{TokenVerifier, VerifiedToken};

/// Where the access provider publishes its signing keys, relative to the issuer.
pub const CERTS_PATH: &str = "/cdn-cgi/access/certs";
