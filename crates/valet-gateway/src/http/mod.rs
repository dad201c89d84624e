pub mod chat;
pub mod health;
pub mod webhooks;

use axum::http::HeaderMap;

use crate::app::AppState;

/// Returns true when the request is authorised. Token unset means auth is
/// disabled (deployments fronted by a trusted tunnel).
pub(crate) fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.gateway.auth_token.as_deref() else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t == expected)
        .unwrap_or(false)
}

/// The authenticated principal. Session management is handled upstream;
/// the proxy forwards the resolved user id in X-User-Id.
pub(crate) fn current_user(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string()
}
