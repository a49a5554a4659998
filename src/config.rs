use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_FALLBACK_FILE: &str = "smtp.txt";
const DEFAULT_DAILY_LIMIT: u32 = 1400;
const DEFAULT_SOFT_LIMIT_PERCENT: u32 = 90;
const DEFAULT_BULK_MAX_UNITS: usize = 500;
const DEFAULT_DISPATCH_SPACING_MS: u64 = 100;

// 端点列表缓存 1 秒 ~ 1 天，下载超时 100ms ~ 2 分钟。
const CACHE_TTL_RANGE_SECS: (u64, u64) = (1, 86_400);
const FETCH_TIMEOUT_RANGE_MS: (u64, u64) = (100, 120_000);

pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Hello {email} - ID: {randomID:7}";
/// "Mailer <noreply@gmail.com>" 的 base64。
pub const DEFAULT_FROM_NAME: &str = "TWFpbGVyIDxub3JlcGx5QGdtYWlsLmNvbT4=";

const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc?export=download&id=";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub smtp_file_id: String,
    pub endpoint_source_override: String,
    pub endpoint_fallback_file: String,
    pub endpoint_cache_ttl_secs: u64,
    pub fetch_timeout_ms: u64,

    pub timeout_ms: u64,
    pub proxy: String,

    pub daily_limit: u32,
    pub soft_limit_percent: u32,
    pub bulk_max_units: usize,
    pub dispatch_spacing_ms: u64,

    pub subject_template: String,
    pub from_name: String,

    pub admin_key: String,

    pub debug: String,
}

/// figment 会把形如数字/布尔的环境变量解析成对应类型，这里统一接住再还原成字符串，
/// 单个字段非法时只回落该字段的默认值。
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvValue {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
}

impl EnvValue {
    fn into_string(self) -> String {
        match self {
            EnvValue::Str(s) => s,
            EnvValue::Int(n) => n.to_string(),
            EnvValue::Uint(n) => n.to_string(),
            EnvValue::Float(n) => n.to_string(),
            EnvValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<EnvValue>,
    #[serde(alias = "PORT")]
    port: Option<EnvValue>,

    #[serde(alias = "SMTP_FILE_ID")]
    smtp_file_id: Option<EnvValue>,
    #[serde(alias = "ENDPOINT_SOURCE_URL")]
    endpoint_source_url: Option<EnvValue>,
    #[serde(alias = "ENDPOINT_FALLBACK_FILE")]
    endpoint_fallback_file: Option<EnvValue>,
    #[serde(alias = "ENDPOINT_CACHE_TTL")]
    endpoint_cache_ttl: Option<EnvValue>,
    #[serde(alias = "FETCH_TIMEOUT")]
    fetch_timeout: Option<EnvValue>,

    #[serde(alias = "TIMEOUT")]
    timeout: Option<EnvValue>,
    #[serde(alias = "PROXY")]
    proxy: Option<EnvValue>,

    #[serde(alias = "DAILY_LIMIT")]
    daily_limit: Option<EnvValue>,
    #[serde(alias = "SOFT_LIMIT_PERCENT")]
    soft_limit_percent: Option<EnvValue>,
    #[serde(alias = "BULK_MAX_UNITS")]
    bulk_max_units: Option<EnvValue>,
    #[serde(alias = "DISPATCH_SPACING_MS")]
    dispatch_spacing_ms: Option<EnvValue>,

    #[serde(alias = "SUBJECT_TEMPLATE")]
    subject_template: Option<EnvValue>,
    #[serde(alias = "FROM_NAME")]
    from_name: Option<EnvValue>,

    #[serde(alias = "ADMIN_KEY")]
    admin_key: Option<EnvValue>,

    #[serde(alias = "DEBUG")]
    debug: Option<EnvValue>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            host: non_empty(raw.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_num(raw.port).unwrap_or(DEFAULT_PORT),
            smtp_file_id: non_empty(raw.smtp_file_id).unwrap_or_default(),
            endpoint_source_override: non_empty(raw.endpoint_source_url).unwrap_or_default(),
            endpoint_fallback_file: non_empty(raw.endpoint_fallback_file)
                .unwrap_or_else(|| DEFAULT_FALLBACK_FILE.to_string()),
            endpoint_cache_ttl_secs: parse_num(raw.endpoint_cache_ttl)
                .unwrap_or(DEFAULT_CACHE_TTL_SECS)
                .clamp(CACHE_TTL_RANGE_SECS.0, CACHE_TTL_RANGE_SECS.1),
            fetch_timeout_ms: parse_num(raw.fetch_timeout)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS)
                .clamp(FETCH_TIMEOUT_RANGE_MS.0, FETCH_TIMEOUT_RANGE_MS.1),
            timeout_ms: parse_num(raw.timeout).unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: non_empty(raw.proxy).unwrap_or_default(),
            daily_limit: parse_num(raw.daily_limit)
                .unwrap_or(DEFAULT_DAILY_LIMIT)
                .max(1),
            soft_limit_percent: parse_num(raw.soft_limit_percent)
                .unwrap_or(DEFAULT_SOFT_LIMIT_PERCENT)
                .clamp(1, 100),
            bulk_max_units: parse_num(raw.bulk_max_units)
                .unwrap_or(DEFAULT_BULK_MAX_UNITS)
                .max(1),
            dispatch_spacing_ms: parse_num(raw.dispatch_spacing_ms)
                .unwrap_or(DEFAULT_DISPATCH_SPACING_MS),
            subject_template: non_empty(raw.subject_template)
                .unwrap_or_else(|| DEFAULT_SUBJECT_TEMPLATE.to_string()),
            from_name: non_empty(raw.from_name).unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
            admin_key: non_empty(raw.admin_key).unwrap_or_default(),
            debug: non_empty(raw.debug).unwrap_or_else(|| "off".to_string()),
        }
    }

    /// 端点列表下载地址：显式覆盖优先，否则由文档 id 拼出；两者都没有时为空。
    pub fn endpoint_source_url(&self) -> String {
        if !self.endpoint_source_override.is_empty() {
            return self.endpoint_source_override.clone();
        }
        if self.smtp_file_id.is_empty() {
            return String::new();
        }
        format!("{DRIVE_DOWNLOAD_URL}{}", self.smtp_file_id)
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    pub fn admin_key_required(&self) -> bool {
        !self.admin_key.is_empty()
    }
}

fn non_empty(v: Option<EnvValue>) -> Option<String> {
    v.map(|s| s.into_string().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_num<T: std::str::FromStr>(v: Option<EnvValue>) -> Option<T> {
    non_empty(v)?.parse().ok()
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已在进程环境中显式设置的变量优先。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段加载 .env，且未并发访问环境变量，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_lines() {
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("=value"), None);
        assert_eq!(
            parse_dotenv_line("export PORT=8080"),
            Some(("PORT".to_string(), "8080".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("SUBJECT_TEMPLATE=\"Hi {email} # not a comment\""),
            Some((
                "SUBJECT_TEMPLATE".to_string(),
                "Hi {email} # not a comment".to_string()
            ))
        );
        assert_eq!(
            parse_dotenv_line("DAILY_LIMIT=1000 # per app"),
            Some(("DAILY_LIMIT".to_string(), "1000".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("FROM_NAME=abc=="),
            Some(("FROM_NAME".to_string(), "abc==".to_string()))
        );
    }

    #[test]
    fn defaults_and_invalid_numbers() {
        let cfg = Config::from_raw(RawEnv {
            port: Some(EnvValue::Str("not-a-port".to_string())),
            daily_limit: Some(EnvValue::Uint(0)),
            soft_limit_percent: Some(EnvValue::Int(250)),
            admin_key: Some(EnvValue::Str("  ".to_string())),
            ..RawEnv::default()
        });
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.daily_limit, 1);
        assert_eq!(cfg.soft_limit_percent, 100);
        assert_eq!(cfg.bulk_max_units, DEFAULT_BULK_MAX_UNITS);
        assert_eq!(cfg.subject_template, DEFAULT_SUBJECT_TEMPLATE);
        assert!(!cfg.admin_key_required());
    }

    #[test]
    fn cache_ttl_and_fetch_timeout_are_clamped() {
        let cfg = Config::from_raw(RawEnv {
            endpoint_cache_ttl: Some(EnvValue::Uint(u64::MAX)),
            fetch_timeout: Some(EnvValue::Uint(0)),
            ..RawEnv::default()
        });
        assert_eq!(cfg.endpoint_cache_ttl_secs, 86_400);
        assert_eq!(cfg.fetch_timeout_ms, 100);

        let cfg = Config::from_raw(RawEnv {
            endpoint_cache_ttl: Some(EnvValue::Str("0".to_string())),
            fetch_timeout: Some(EnvValue::Str("999999999".to_string())),
            ..RawEnv::default()
        });
        assert_eq!(cfg.endpoint_cache_ttl_secs, 1);
        assert_eq!(cfg.fetch_timeout_ms, 120_000);

        let cfg = Config::from_raw(RawEnv::default());
        assert_eq!(cfg.endpoint_cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert_eq!(cfg.fetch_timeout_ms, DEFAULT_FETCH_TIMEOUT_MS);
    }

    #[test]
    fn endpoint_source_url_prefers_override() {
        let mut cfg = Config::from_raw(RawEnv::default());
        assert_eq!(cfg.endpoint_source_url(), "");

        cfg.smtp_file_id = "abc123".to_string();
        assert_eq!(
            cfg.endpoint_source_url(),
            "https://drive.google.com/uc?export=download&id=abc123"
        );

        cfg.endpoint_source_override = "https://lists.example/apps.txt".to_string();
        assert_eq!(cfg.endpoint_source_url(), "https://lists.example/apps.txt");
    }
}
