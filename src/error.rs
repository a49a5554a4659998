use crate::gateway::WebAppStat;
use crate::relay::RelayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("参数错误: {0}")]
    BadRequest(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// 所有失败响应共用的 JSON 结构，缺省字段不输出。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_reset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_app_stats: Option<Vec<WebAppStat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_apps: Option<usize>,
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Relay(e) => match e {
                RelayError::NoCapacity { .. } | RelayError::EndpointQuotaExceeded { .. } => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                RelayError::Dispatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                RelayError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            success: false,
            error: self.to_string(),
            details: None,
            next_reset: None,
            web_app_stats: None,
            available_apps: None,
        };

        match self {
            AppError::Relay(RelayError::NoCapacity {
                endpoints,
                next_reset,
            }) => {
                body.next_reset = Some(next_reset.to_rfc3339());
                body.web_app_stats = Some(endpoints.iter().map(WebAppStat::from).collect());
            }
            AppError::Relay(RelayError::EndpointQuotaExceeded {
                available_apps,
                detail,
                ..
            }) => {
                body.available_apps = Some(*available_apps);
                body.details = Some(detail.clone());
            }
            AppError::Relay(RelayError::Dispatch { webapp, detail }) => {
                body.details = Some(format!("WebApp #{webapp}: {detail}"));
            }
            AppError::Relay(RelayError::ProviderUnavailable(e)) => {
                body.error = "无法获取 WebApp 地址列表".to_string();
                body.details = Some(e.to_string());
            }
            AppError::Anyhow(e) => {
                body.error = "服务内部错误".to_string();
                body.details = Some(format!("{e:#}"));
            }
            _ => {}
        }

        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::FetchError;
    use crate::relay::EndpointStat;
    use chrono::Local;
    use std::sync::Arc;

    #[test]
    fn no_capacity_carries_snapshot_and_next_reset() {
        let err = AppError::from(RelayError::NoCapacity {
            endpoints: vec![EndpointStat {
                webapp: Some(1),
                address: Arc::from("https://app0.example/exec"),
                usage: 1260,
                in_flight: 0,
                limit: 1400,
                remaining: 140,
                exhausted: false,
            }],
            next_reset: Local::now(),
        });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        let v = serde_json::to_value(err.body()).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["nextReset"].is_string());
        assert_eq!(v["webAppStats"][0]["webApp"], 1);
        assert_eq!(v["webAppStats"][0]["percentage"], "90.0%");
        assert!(v.get("details").is_none());
    }

    #[test]
    fn status_codes_by_kind() {
        let quota = AppError::from(RelayError::EndpointQuotaExceeded {
            webapp: 2,
            available_apps: 3,
            detail: "429".to_string(),
        });
        assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(serde_json::to_value(quota.body()).unwrap()["availableApps"], 3);

        let dispatch = AppError::from(RelayError::Dispatch {
            webapp: 1,
            detail: "timeout".to_string(),
        });
        assert_eq!(dispatch.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let provider = AppError::from(RelayError::from(FetchError::Empty));
        assert_eq!(provider.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(
            AppError::bad_request("to").status(),
            StatusCode::BAD_REQUEST
        );
    }
}
