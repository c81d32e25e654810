use std::fmt;

use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri, Version, header};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use serde::Deserialize;

use crate::services::auth::VerifiedToken;

/// Set by the edge proxy; trusted as the client address.
pub const CLIENT_IP_HEADER: HeaderName = HeaderName::from_static("cf-connecting-ip");
pub const ORIGINAL_URL_HEADER: HeaderName = HeaderName::from_static("x-original-url");

const UNKNOWN: &str = "-";

/// Request fields the access log needs, captured before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub client_ip: String,
    pub method: Method,
    pub request_uri: String,
    pub version: Version,
    pub original_url: String,
    pub user_agent: String,
}

impl RequestMeta {
    pub fn new(method: &Method, uri: &Uri, version: Version, headers: &HeaderMap) -> Self {
        let request_uri = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            client_ip: header_text(headers, &CLIENT_IP_HEADER),
            method: method.clone(),
            request_uri,
            version,
            original_url: header_text(headers, &ORIGINAL_URL_HEADER),
            user_agent: header_text(headers, &header::USER_AGENT),
        }
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// What the request path hands to the audit queue.
///
/// Identity resolution is deferred to the worker; the request task only moves
/// data.
#[derive(Debug)]
pub struct AuditEntry {
    pub meta: RequestMeta,
    pub status: StatusCode,
    pub token: Option<VerifiedToken>,
    pub at: DateTime<FixedOffset>,
}

impl AuditEntry {
    pub fn new(meta: RequestMeta, status: StatusCode, token: Option<VerifiedToken>) -> Self {
        Self {
            meta,
            status,
            token,
            at: Local::now().fixed_offset(),
        }
    }

    pub fn into_record(self) -> AuditRecord {
        AuditRecord {
            identity: resolve_identity(self.token.as_ref()),
            timestamp: self.at,
            status: self.status.as_u16(),
            meta: self.meta,
        }
    }
}

/// One access-log line.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub meta: RequestMeta,
    pub identity: String,
    pub timestamp: DateTime<FixedOffset>,
    pub status: u16,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"{} - {} [{}] "{} {} {}" {} - "{}" "{}""#,
            self.meta.client_ip,
            self.identity,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.meta.method,
            self.meta.request_uri,
            protocol(self.meta.version),
            self.status,
            self.meta.original_url,
            self.meta.user_agent,
        )
    }
}

fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdentityClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    common_name: Option<String>,
}

/// Display identity for the log: `email`, then `common_name`, then `-`.
///
/// Unparseable claims count as no claims.
pub fn resolve_identity(token: Option<&VerifiedToken>) -> String {
    let claims = token
        .and_then(|t| t.claims::<IdentityClaims>().ok())
        .unwrap_or_default();

    [claims.email, claims.common_name]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}
