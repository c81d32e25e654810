/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - verifier: 起動時に一度だけ組み立て、以降は読み取り専用
 *   - audit: アクセスログのキュー (送信側)
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::sync::Arc;

use crate::services::{audit::AuditLogger, auth::TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(verifier: Arc<dyn TokenVerifier>, audit: AuditLogger) -> Self {
        Self { verifier, audit }
    }
}
