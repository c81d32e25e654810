//! In-memory sink for tests.

use std::sync::{Arc, Mutex};

use crate::services::audit::logger::AuditSink;

#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl AuditSink for MemorySink {
    fn write_line(&mut self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
