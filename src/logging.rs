use std::time::Duration;

/// 详细日志等级：
/// - off：不输出客户端/后端的详细请求响应
/// - low：输出客户端请求/响应
/// - medium：额外输出每一次 WebApp 投递请求/响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            // 兼容旧值 high/all：没有更详细的一档，按 medium 处理。
            "medium" | "backend" | "high" | "all" => Self::Medium,
            _ => Self::Off,
        }
    }

    pub fn client_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn client_request(method: &str, path_and_query: &str, body: &[u8]) {
    tracing::info!(
        "\n===================== 客户端请求 ======================\n[客户端请求] {method} {path_and_query}\n{}\n=========================================================",
        format_body_bytes(body)
    );
}

pub fn client_response(status: u16, duration: Duration, body: Option<&sonic_rs::Value>) {
    tracing::info!(
        "\n===================== 客户端响应 ======================\n[客户端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body.map(format_body_value).unwrap_or_default()
    );
}

pub fn backend_request(method: &str, url: &str, to: &str, subject: &str) {
    tracing::info!(
        "\n====================== 投递请求 ========================\n[投递请求] {method} {url}\n[收件人] {to}\n[主题] {}\n==========================================================",
        truncate_text_for_log(subject)
    );
}

pub fn backend_response(status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n====================== 投递响应 ========================\n[投递响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        format_body_bytes(body)
    );
}

fn format_body_value(v: &sonic_rs::Value) -> String {
    match sonic_rs::to_string_pretty(v) {
        Ok(s) => truncate_text_for_log(&s),
        Err(_) => truncate_text_for_log(&v.to_string()),
    }
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    // 大包不做 JSON 解析，直接截断。
    const MAX_PARSE_BYTES: usize = 256 * 1024;
    if bytes.len() > MAX_PARSE_BYTES {
        return format!(
            "(body too large: {} bytes)\n{}",
            bytes.len(),
            truncate_text_for_log(&String::from_utf8_lossy(&bytes[..MAX_PARSE_BYTES]))
        );
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => format_body_value(&v),
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 8 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!(LogLevel::parse("off"), LogLevel::Off);
        assert_eq!(LogLevel::parse(""), LogLevel::Off);
        assert_eq!(LogLevel::parse(" LOW "), LogLevel::Low);
        assert_eq!(LogLevel::parse("medium"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("high"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Off);

        assert!(LogLevel::Low.client_enabled());
        assert!(!LogLevel::Low.backend_enabled());
        assert!(LogLevel::Medium.backend_enabled());
    }

    #[test]
    fn long_text_is_truncated() {
        let s = "a".repeat(10_000);
        let out = truncate_text_for_log(&s);
        assert!(out.ends_with("...[TRUNCATED]"));
        assert_eq!(out.chars().count(), 8 * 1024 + "...[TRUNCATED]".len());
    }

    #[test]
    fn json_bodies_are_pretty_printed() {
        let out = format_body_bytes(br#"{"success":true}"#);
        assert!(out.contains("success") && out.contains('\n'));
        assert_eq!(format_body_bytes(b"plain"), "plain");
    }
}
