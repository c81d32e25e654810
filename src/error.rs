/*
 * Responsibility
 * - 起動 / serve 時のエラー定義 (リクエスト単位の失敗はすべて 401 に畳むのでここには来ない)
 */
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::auth::remote_jwks::KeySetError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build key set client: {0}")]
    KeySet(#[from] KeySetError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
