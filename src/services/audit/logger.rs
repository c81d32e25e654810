//! Access-log queue.
//!
//! Request tasks push entries into a bounded channel; a single worker turns
//! them into lines and hands them to an [`AuditSink`]. Delivery is best-effort:
//! - queue full => the entry is dropped (warn)
//! - worker gone => the entry is dropped (debug)
//! - shutdown => whatever is queued gets drained, bounded by the caller's timeout

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::audit::record::AuditEntry;

/// `tracing` target the access log is written on.
pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Destination for finished access-log lines.
pub trait AuditSink: Send + 'static {
    fn write_line(&mut self, line: &str);
}

/// Emits every line as one `tracing` event on [`ACCESS_LOG_TARGET`].
///
/// The subscriber renders that target without prefixes, so the line is the
/// whole output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write_line(&mut self, line: &str) {
        tracing::info!(target: ACCESS_LOG_TARGET, "{line}");
    }
}

/// Producer side. Cheap to clone; `record` never waits.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEntry>,
}

/// Consumer side; see [`AuditWorker::run`].
#[derive(Debug)]
pub struct AuditWorker {
    rx: mpsc::Receiver<AuditEntry>,
}

impl AuditLogger {
    pub fn channel(capacity: usize) -> (Self, AuditWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AuditWorker { rx })
    }

    pub fn record(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!(
                    status = entry.status.as_u16(),
                    uri = %entry.meta.request_uri,
                    "access log queue full, dropping record"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("access log worker stopped, dropping record");
            }
        }
    }
}

impl AuditWorker {
    /// Write entries until every [`AuditLogger`] is dropped and the queue is
    /// empty. Returns the number of lines written.
    pub async fn run<S: AuditSink>(mut self, mut sink: S) -> u64 {
        let mut written = 0u64;

        while let Some(entry) = self.rx.recv().await {
            let line = entry.into_record().to_string();
            sink.write_line(&line);
            written += 1;
        }

        debug!(written, "access log worker finished");
        written
    }

    pub fn spawn<S: AuditSink>(self, sink: S) -> JoinHandle<u64> {
        tokio::spawn(self.run(sink))
    }
}
