pub mod logger;
pub mod record;

#[cfg(test)]
pub mod testing;

pub use logger::{ACCESS_LOG_TARGET, AuditLogger, TracingSink};
pub use record::{AuditEntry, RequestMeta};
