use super::handler::AppState;
use crate::error::AppError;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// 管理路由鉴权：配置了 ADMIN_KEY 时，要求 x-admin-key 或 Bearer token 与之相同。
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.cfg.admin_key_required() || is_authorized(request.headers(), &state.cfg.admin_key) {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "管理接口鉴权失败");
    AppError::unauthorized("缺少或错误的管理员密钥").into_response()
}

fn is_authorized(headers: &HeaderMap, admin_key: &str) -> bool {
    let header_key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if header_key == Some(admin_key) {
        return true;
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == admin_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accepts_header_or_bearer() {
        let mut headers = HeaderMap::new();
        assert!(!is_authorized(&headers, "secret"));

        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(is_authorized(&headers, "secret"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(is_authorized(&headers, "secret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!is_authorized(&headers, "secret"));
    }
}
