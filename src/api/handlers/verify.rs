/*
 * Responsibility
 * - 任意メソッド・任意パスの検証エンドポイント
 * - assertion ヘッダ → verifier → audience 照合 → ステータスのみのレスポンス
 * - アクセスログは middleware 側 (レスポンス確定後) で積む
 */
use axum::{extract::State, http::Uri};

use crate::api::extractors::AccessAssertion;
use crate::services::auth::{Decision, decide};
use crate::state::AppState;

pub async fn verify(
    State(state): State<AppState>,
    AccessAssertion(assertion): AccessAssertion,
    uri: Uri,
) -> Decision {
    decide(state.verifier.as_ref(), assertion.as_deref(), uri.path()).await
}
