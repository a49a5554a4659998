use crate::config::Config;
use crate::delivery::types::{DeliveryOutcome, MailUnit};
use crate::logging;
use sonic_rs::{JsonContainerTrait, JsonValueTrait};
use std::future::Future;
use std::time::{Duration, Instant};

/// 上游每日配额耗尽时在正文里给出的提示（Apps Script 以 200 返回错误页）。
const QUOTA_MARKERS: [&str; 2] = ["service invoked too many times", "resource_exhausted"];

/// 投递能力：把一个单元交给指定端点，并给出结果分类。实现必须有超时上限。
pub trait Deliverer: Send + Sync {
    fn deliver(
        &self,
        address: &str,
        unit: &MailUnit,
    ) -> impl Future<Output = DeliveryOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct WebAppClient {
    http: reqwest::Client,
    timeout: Duration,
    log_level: logging::LogLevel,
}

impl WebAppClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        Self::build(
            Duration::from_millis(cfg.timeout_ms.max(1)),
            &cfg.proxy,
            cfg.log_level(),
        )
    }

    fn build(
        timeout: Duration,
        proxy: &str,
        log_level: logging::LogLevel,
    ) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout);

        if !proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            timeout,
            log_level,
        })
    }

    async fn send(&self, address: &str, unit: &MailUnit) -> DeliveryOutcome {
        if self.log_level.backend_enabled() {
            logging::backend_request("GET", address, &unit.to, &unit.subject);
        }

        let start = Instant::now();
        let request = self.http.get(address).query(&[
            ("to", unit.to.as_str()),
            ("from", unit.from.as_str()),
            ("subject", unit.subject.as_str()),
        ]);
        let call = async {
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        // reqwest 自身也有超时；外层再兜一次，保证任何情况下都不会无限等待。
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => DeliveryOutcome::OtherFailure(format!(
                "投递超时（{}ms）",
                logging::format_duration_ms(self.timeout)
            )),
            Ok(Err(e)) => DeliveryOutcome::OtherFailure(e.to_string()),
            Ok(Ok((status, body))) => {
                if self.log_level.backend_enabled() {
                    logging::backend_response(status, start.elapsed(), &body);
                }
                classify_response(status, &body)
            }
        }
    }
}

impl Deliverer for WebAppClient {
    async fn deliver(&self, address: &str, unit: &MailUnit) -> DeliveryOutcome {
        self.send(address, unit).await
    }
}

/// 把上游响应归入三类结果之一。
///
/// - 429，或 2xx 但正文带有配额耗尽提示：QuotaExceeded
/// - 其余 2xx：Delivered
/// - 其他状态码：OtherFailure
pub(crate) fn classify_response(status: u16, body: &[u8]) -> DeliveryOutcome {
    if status == 429 {
        return DeliveryOutcome::QuotaExceeded(error_detail(status, body));
    }
    if (200..300).contains(&status) {
        if mentions_quota(body) {
            return DeliveryOutcome::QuotaExceeded(error_detail(status, body));
        }
        return DeliveryOutcome::Delivered;
    }
    DeliveryOutcome::OtherFailure(error_detail(status, body))
}

fn mentions_quota(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body).to_lowercase();
    QUOTA_MARKERS.iter().any(|m| text.contains(m))
}

/// 提取错误描述：优先 JSON 的 error / error.message，其次截断后的正文。
fn error_detail(status: u16, body: &[u8]) -> String {
    if let Ok(v) = sonic_rs::from_slice::<sonic_rs::Value>(body)
        && let Some(err) = v.as_object().and_then(|o| o.get(&"error"))
    {
        if let Some(s) = err.as_str() {
            return s.to_string();
        }
        if let Some(msg) = err
            .as_object()
            .and_then(|o| o.get(&"message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
    }

    const MAX_CHARS: usize = 200;
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {status}");
    }
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    format!("HTTP {status}: {out}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_delivered() {
        assert_eq!(classify_response(200, b"OK"), DeliveryOutcome::Delivered);
        assert_eq!(classify_response(204, b""), DeliveryOutcome::Delivered);
    }

    #[test]
    fn status_429_is_quota_exceeded() {
        let out = classify_response(429, br#"{"error":"Too many emails today"}"#);
        assert_eq!(
            out,
            DeliveryOutcome::QuotaExceeded("Too many emails today".to_string())
        );
    }

    #[test]
    fn quota_message_in_success_body_is_quota_exceeded() {
        let body = b"<html>Exception: Service invoked too many times for one day: email.</html>";
        assert!(matches!(
            classify_response(200, body),
            DeliveryOutcome::QuotaExceeded(_)
        ));
    }

    #[test]
    fn other_statuses_are_other_failures() {
        let out = classify_response(500, br#"{"error":{"message":"backend exploded"}}"#);
        assert_eq!(
            out,
            DeliveryOutcome::OtherFailure("backend exploded".to_string())
        );

        let out = classify_response(403, b"");
        assert_eq!(out, DeliveryOutcome::OtherFailure("HTTP 403".to_string()));
    }

    fn unit() -> MailUnit {
        MailUnit {
            to: "user@example.com".to_string(),
            subject: "hello".to_string(),
            from: "Sender".to_string(),
        }
    }

    #[tokio::test]
    async fn unanswered_request_times_out_as_other_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // 只接受连接，不读也不回。
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let client =
            WebAppClient::build(Duration::from_millis(200), "", logging::LogLevel::Off).unwrap();
        let start = Instant::now();
        let outcome = client
            .deliver(&format!("http://{addr}/exec"), &unit())
            .await;

        assert!(matches!(outcome, DeliveryOutcome::OtherFailure(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_other_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            WebAppClient::build(Duration::from_millis(500), "", logging::LogLevel::Off).unwrap();
        let outcome = client
            .deliver(&format!("http://{addr}/exec"), &unit())
            .await;
        assert!(matches!(outcome, DeliveryOutcome::OtherFailure(_)));
    }

    #[test]
    fn long_plain_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let DeliveryOutcome::OtherFailure(detail) = classify_response(502, body.as_bytes()) else {
            panic!("expected failure");
        };
        assert!(detail.starts_with("HTTP 502: "));
        assert!(detail.ends_with("..."));
        assert!(detail.len() < 300);
    }
}
