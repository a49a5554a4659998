use super::types::{
    BulkRequest, BulkResponse, EmailQuery, HealthResponse, RefreshResponse, ResetResponse,
    SingleResponse, StatsResponse, now_iso,
};
use crate::config::Config;
use crate::delivery::{MailUnit, WebAppClient};
use crate::endpoint::DriveSource;
use crate::error::AppError;
use crate::logging::{self, LogLevel};
use crate::relay::Relay;
use crate::util::{name, template};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub cfg: Config,
    pub relay: Relay<DriveSource, WebAppClient>,
    /// 解码后的默认发件人名称。
    pub default_from: String,
}

impl AppState {
    pub fn new(cfg: Config, relay: Relay<DriveSource, WebAppClient>) -> Self {
        let default_from = name::decode_from_name(&cfg.from_name);
        Self {
            cfg,
            relay,
            default_from,
        }
    }

    fn compose(&self, to: &str, subject: Option<&str>, from: Option<&str>) -> MailUnit {
        let subject = match subject.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => template::render_subject(&self.cfg.subject_template, to),
        };
        let from = match from.map(str::trim).filter(|s| !s.is_empty()) {
            Some(f) => f.to_string(),
            None => self.default_from.clone(),
        };
        MailUnit {
            to: to.to_string(),
            subject,
            from,
        }
    }
}

/// 一次客户端交互的日志上下文：请求进入时记录，响应时按同一等级输出。
struct Exchange {
    level: LogLevel,
    start: Instant,
}

impl Exchange {
    fn begin(cfg: &Config, method: &Method, uri: &OriginalUri, body: &[u8]) -> Self {
        let level = cfg.log_level();
        if level.client_enabled() {
            let path = uri
                .0
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or_else(|| uri.0.path());
            logging::client_request(method.as_str(), path, body);
        }
        Self {
            level,
            start: Instant::now(),
        }
    }

    fn log<T: Serialize>(&self, status: StatusCode, body: &T) {
        if !self.level.client_enabled() {
            return;
        }
        let value = sonic_rs::to_value(body).ok();
        logging::client_response(status.as_u16(), self.start.elapsed(), value.as_ref());
    }

    fn ok<T: Serialize>(&self, body: T) -> Response {
        self.log(StatusCode::OK, &body);
        (StatusCode::OK, Json(body)).into_response()
    }

    fn fail(&self, err: AppError) -> Response {
        let status = err.status();
        let body = err.body();
        self.log(status, &body);
        (status, Json(body)).into_response()
    }
}

pub async fn handle_index() -> Response {
    Json(serde_json::json!({
        "message": format!("Mail Relay v{VERSION}"),
        "endpoints": {
            "GET /email": "单发 - 参数: to（必填）, subject（可选）, from（可选）",
            "POST /bulk": "批量发送 - Body: { emails: [], subject: \"\", from: \"\" }",
            "GET /stats": "统计信息",
            "GET /health": "健康检查",
            "POST /reset": "重置用量与耗尽标记（管理员）",
            "POST /refresh": "刷新 WebApp 地址缓存（管理员）"
        },
        "examples": {
            "single": "GET /email?to=test@example.com&subject=Hello&from=Sender",
            "bulk": "POST /bulk {\"emails\": [\"test1@example.com\"], \"subject\": \"Hello\"}"
        }
    }))
    .into_response()
}

pub async fn handle_health() -> Response {
    Json(HealthResponse {
        success: true,
        message: "Mail Relay 运行中",
        timestamp: now_iso(),
        version: VERSION,
    })
    .into_response()
}

pub async fn handle_email(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    Query(query): Query<EmailQuery>,
) -> Response {
    let ex = Exchange::begin(&state.cfg, &method, &uri, &[]);

    let to = query.to.as_deref().map(str::trim).unwrap_or_default();
    if to.is_empty() {
        return ex.fail(AppError::bad_request("缺少参数 to（收件人邮箱）"));
    }
    if !is_valid_email(to) {
        return ex.fail(AppError::bad_request("邮箱格式不正确"));
    }

    let unit = state.compose(to, query.subject.as_deref(), query.from.as_deref());
    match state.relay.send_one(&unit).await {
        Ok(receipt) => ex.ok(SingleResponse::new(unit.to, unit.subject, unit.from, receipt)),
        Err(e) => ex.fail(e.into()),
    }
}

pub async fn handle_bulk(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    body: Bytes,
) -> Response {
    let ex = Exchange::begin(&state.cfg, &method, &uri, body.as_ref());

    let req: BulkRequest = match sonic_rs::from_slice(body.as_ref()) {
        Ok(v) => v,
        Err(_) => {
            return ex.fail(AppError::bad_request(
                "请求 JSON 解析失败，emails 必须是字符串数组",
            ));
        }
    };

    if req.emails.is_empty() {
        return ex.fail(AppError::bad_request("emails 必须是非空数组"));
    }
    let max = state.cfg.bulk_max_units;
    if req.emails.len() > max {
        return ex.fail(AppError::bad_request(format!(
            "单次批量最多 {max} 封"
        )));
    }

    // 每个收件人各自渲染主题，随机片段互不相同。
    let units: Vec<MailUnit> = req
        .emails
        .iter()
        .map(|to| state.compose(to.trim(), req.subject.as_deref(), req.from.as_deref()))
        .collect();

    match state.relay.send_batch(&units).await {
        Ok(report) => {
            tracing::info!(
                "批量发送完成：共 {}，成功 {}，失败 {}，未分配 {}",
                report.total,
                report.delivered,
                report.failed,
                report.undistributed
            );
            ex.ok(BulkResponse::from(report))
        }
        Err(e) => ex.fail(e.into()),
    }
}

pub async fn handle_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(StatsResponse::from(state.relay.stats().await)).into_response()
}

pub async fn handle_reset(State(state): State<Arc<AppState>>) -> Response {
    let at = state.relay.reset();
    tracing::info!("管理员手动重置用量（{}）", at.to_rfc3339());
    Json(ResetResponse {
        success: true,
        message: "用量计数与耗尽标记已重置",
        timestamp: now_iso(),
    })
    .into_response()
}

pub async fn handle_refresh(State(state): State<Arc<AppState>>) -> Response {
    match state.relay.refresh().await {
        Ok(n) => Json(RefreshResponse {
            success: true,
            message: "WebApp 地址缓存已刷新",
            urls_loaded: n,
            timestamp: now_iso(),
        })
        .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

pub async fn handle_not_found(uri: OriginalUri) -> Response {
    AppError::not_found(uri.0.path().to_string()).into_response()
}

/// 与 `^[^\s@]+@[^\s@]+\.[^\s@]+$` 等价：恰好一个 @，两侧无空白，域名中间有一个点。
pub fn is_valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let len = domain.len();
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("a.b+tag@mail.example.co"));
        assert!(is_valid_email("x@a..b"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@.com"));
        assert!(!is_valid_email("user@example."));
        assert!(!is_valid_email("us er@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
    }
}
