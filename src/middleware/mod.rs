/*
 * Responsibility
 * - middleware の公開インターフェース
 * - access_log::apply(...), http::apply(...)
 */
pub mod access_log;
pub mod http;
