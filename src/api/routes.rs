/*
 * Responsibility
 * - URL 構造の定義
 * - パス自体が保護対象リソースの識別子なので、全メソッド・全パスを単一の fallback で受ける
 */
use axum::Router;

use crate::api::handlers::verify::verify;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().fallback(verify)
}
