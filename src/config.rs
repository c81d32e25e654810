/*
 * Responsibility
 * - CLI フラグ / 環境変数 (.env 含む) の読み込み
 * - 設定値のバリデーション (issuer が無い・不正なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use jsonwebtoken::Algorithm;
use url::Url;

use crate::services::auth::CERTS_PATH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Command-line flags. Every flag falls back to an environment variable.
#[derive(Debug, Parser)]
#[command(name = "access-gate", version, about = "Verify edge access identity tokens")]
pub struct Cli {
    /// Access JWT issuer URL
    #[arg(long, env = "ACCESS_ISSUER", value_name = "https://NAME.cloudflareaccess.com")]
    pub issuer: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Accepted JWS algorithms (comma separated)
    #[arg(
        long,
        env = "SIGNING_ALGORITHMS",
        value_delimiter = ',',
        default_value = "RS256"
    )]
    pub signing_algorithms: Vec<String>,

    /// Clock skew tolerated for exp
    #[arg(long, env = "TOKEN_LEEWAY_SECONDS", default_value_t = 0)]
    pub leeway_seconds: u64,

    /// Clock skew tolerated for nbf (issuer clocks may run ahead)
    #[arg(long, env = "NBF_LEEWAY_SECONDS", default_value_t = 60)]
    pub nbf_leeway_seconds: u64,

    #[arg(long, env = "JWKS_TIMEOUT_SECONDS", default_value_t = 10)]
    pub jwks_timeout_seconds: u64,

    #[arg(long, env = "AUDIT_QUEUE_CAPACITY", default_value_t = 1024)]
    pub audit_queue_capacity: usize,

    /// How long queued access-log lines may take to flush on shutdown
    #[arg(long, env = "AUDIT_DRAIN_SECONDS", default_value_t = 2)]
    pub audit_drain_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    // Rendered without a trailing slash; must equal the token's `iss` exactly.
    pub issuer: String,
    pub signing_algorithms: Vec<Algorithm>,
    pub leeway_seconds: u64,
    pub nbf_leeway_seconds: u64,
    pub jwks_timeout: Duration,

    pub audit_queue_capacity: usize,
    pub audit_drain_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Self::from_cli(Cli::parse(), AppEnv::from_env())
    }

    pub fn from_cli(cli: Cli, app_env: AppEnv) -> Result<Self, ConfigError> {
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", cli.port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let issuer = parse_issuer(&cli.issuer)?;

        let signing_algorithms = cli
            .signing_algorithms
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(parse_algorithm)
            .collect::<Result<Vec<_>, _>>()?;
        if signing_algorithms.is_empty() {
            return Err(ConfigError::Invalid("SIGNING_ALGORITHMS"));
        }

        if cli.audit_queue_capacity == 0 {
            return Err(ConfigError::Invalid("AUDIT_QUEUE_CAPACITY"));
        }

        Ok(Self {
            addr,
            app_env,
            issuer,
            signing_algorithms,
            leeway_seconds: cli.leeway_seconds,
            nbf_leeway_seconds: cli.nbf_leeway_seconds,
            jwks_timeout: Duration::from_secs(cli.jwks_timeout_seconds),
            audit_queue_capacity: cli.audit_queue_capacity,
            audit_drain_timeout: Duration::from_secs(cli.audit_drain_seconds),
        })
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.issuer, CERTS_PATH)
    }
}

fn parse_issuer(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::Missing("ACCESS_ISSUER"));
    }

    let url = Url::parse(raw).map_err(|_| ConfigError::Invalid("ACCESS_ISSUER"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::Invalid("ACCESS_ISSUER"));
    }

    // Url always renders an empty path as "/", tokens carry the bare origin.
    Ok(url.as_str().trim_end_matches('/').to_string())
}

// Only asymmetric algorithms make sense for keys published in a JWK set.
fn parse_algorithm(raw: &str) -> Result<Algorithm, ConfigError> {
    match Algorithm::from_str(raw) {
        Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) | Err(_) => {
            Err(ConfigError::Invalid("SIGNING_ALGORITHMS"))
        }
        Ok(alg) => Ok(alg),
    }
}
