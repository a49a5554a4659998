//! 端点列表来源：远程文档下载 + moka 缓存 + 本地备用文件。
//!
//! - 缓存 TTL：默认 5 分钟（ENDPOINT_CACHE_TTL）
//! - 并发未命中只会触发一次下载
//! - 备用文件结果不进缓存，下次请求仍会先尝试远程

use crate::config::Config;
use crate::endpoint::types::CacheStatus;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("端点列表下载失败: HTTP {0}")]
    Status(u16),

    #[error("端点列表中没有有效的 WebApp 地址")]
    Empty,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("远程与本地备用文件均无法加载端点列表: {0}")]
    Unavailable(String),
}

/// 端点地址列表的提供方。返回顺序即本次请求的端点序号。
pub trait EndpointSource: Send + Sync {
    fn endpoints(&self) -> impl Future<Output = Result<Arc<Vec<String>>, FetchError>> + Send;

    /// 丢弃缓存并重新加载。
    fn refresh(&self) -> impl Future<Output = Result<Arc<Vec<String>>, FetchError>> + Send;

    fn cache_status(&self) -> impl Future<Output = CacheStatus> + Send;
}

#[derive(Debug, Clone)]
pub struct DriveSource {
    http: reqwest::Client,
    url: String,
    fallback_file: PathBuf,
    cache: Cache<(), Arc<Vec<String>>>,
    last_fetch: Arc<ArcSwapOption<DateTime<Utc>>>,
}

impl DriveSource {
    pub fn new(
        url: String,
        fallback_file: PathBuf,
        ttl: Duration,
        timeout: Duration,
        proxy: &str,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90));
        if !proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            url,
            fallback_file,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
            last_fetch: Arc::new(ArcSwapOption::empty()),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            cfg.endpoint_source_url(),
            PathBuf::from(&cfg.endpoint_fallback_file),
            Duration::from_secs(cfg.endpoint_cache_ttl_secs),
            Duration::from_millis(cfg.fetch_timeout_ms),
            &cfg.proxy,
        )
    }

    async fn load(&self) -> Result<Arc<Vec<String>>, FetchError> {
        // 未配置远程地址时启动阶段已告警过一次，这里直接读备用文件。
        if self.url.trim().is_empty() {
            return self.read_fallback().await.map_err(|e| {
                tracing::error!(error = %e, "本地备用文件无法使用");
                FetchError::Unavailable(e.to_string())
            });
        }

        match self.cache.try_get_with((), self.fetch_remote()).await {
            Ok(urls) => Ok(urls),
            Err(e) => {
                tracing::warn!(error = %e, "拉取远程端点列表失败，尝试本地备用文件");
                self.read_fallback().await.map_err(|fallback_err| {
                    tracing::error!(error = %fallback_err, "本地备用文件也无法使用");
                    FetchError::Unavailable(e.to_string())
                })
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Arc<Vec<String>>, FetchError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let text = resp.text().await?;

        let urls = parse_remote_list(&text);
        if urls.is_empty() {
            return Err(FetchError::Empty);
        }

        self.last_fetch.store(Some(Arc::new(Utc::now())));
        tracing::info!("已从远程文档加载 {} 个 WebApp 地址", urls.len());
        Ok(Arc::new(urls))
    }

    async fn read_fallback(&self) -> Result<Arc<Vec<String>>, FetchError> {
        let data = tokio::fs::read_to_string(&self.fallback_file)
            .await
            .map_err(|e| {
                FetchError::Unavailable(format!("{}: {e}", self.fallback_file.display()))
            })?;

        let urls = parse_fallback_list(&data);
        if urls.is_empty() {
            return Err(FetchError::Empty);
        }

        tracing::warn!(
            "使用本地备用文件 {}（{} 个地址）",
            self.fallback_file.display(),
            urls.len()
        );
        Ok(Arc::new(urls))
    }
}

impl EndpointSource for DriveSource {
    async fn endpoints(&self) -> Result<Arc<Vec<String>>, FetchError> {
        self.load().await
    }

    async fn refresh(&self) -> Result<Arc<Vec<String>>, FetchError> {
        self.cache.invalidate(&()).await;
        self.load().await
    }

    async fn cache_status(&self) -> CacheStatus {
        CacheStatus {
            urls_cached: self.cache.get(&()).await.map(|v| v.len()).unwrap_or(0),
            last_fetch: self.last_fetch.load_full().map(|t| *t),
        }
    }
}

/// 远程文档：每行一个地址，只接受 https:// 开头的行。
fn parse_remote_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| l.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// 本地备用文件：去掉空行与 # 注释行，其余原样接受。
fn parse_fallback_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 本地起一个只会返回固定正文的 HTTP 服务，返回地址与请求计数。
    async fn serve_list(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        (format!("http://{addr}/list"), hits)
    }

    fn remote_source(url: String) -> DriveSource {
        let missing = std::env::temp_dir().join(format!("mailrelay-none-{}.txt", uuid::Uuid::new_v4()));
        DriveSource::new(
            url,
            missing,
            Duration::from_secs(300),
            Duration::from_secs(5),
            "",
        )
        .unwrap()
    }

    const REMOTE_LIST: &str =
        "https://a.example/exec\nhttp://plain.example/exec\n\nhttps://b.example/exec\n";

    fn temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mailrelay-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn source(fallback: PathBuf) -> DriveSource {
        DriveSource::new(
            String::new(),
            fallback,
            Duration::from_secs(300),
            Duration::from_secs(1),
            "",
        )
        .unwrap()
    }

    #[test]
    fn remote_list_keeps_only_https_lines() {
        let text = "https://a.example/exec\r\n\n  https://b.example/exec  \nhttp://c.example\nnot a url\n";
        assert_eq!(
            parse_remote_list(text),
            vec!["https://a.example/exec", "https://b.example/exec"]
        );
    }

    #[test]
    fn fallback_list_skips_blank_and_comment_lines() {
        let text = "# webapps\nhttps://a.example/exec\n\n  http://b.example/exec\n";
        assert_eq!(
            parse_fallback_list(text),
            vec!["https://a.example/exec", "http://b.example/exec"]
        );
    }

    #[tokio::test]
    async fn falls_back_to_local_file_when_remote_is_not_configured() {
        let path = temp_file("https://a.example/exec\nhttps://b.example/exec\n");
        let src = source(path.clone());

        let urls = src.endpoints().await.unwrap();
        assert_eq!(urls.len(), 2);
        // 备用结果不进缓存
        assert_eq!(src.cache_status().await.urls_cached, 0);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_fallback_is_unavailable() {
        let path = std::env::temp_dir().join(format!("mailrelay-missing-{}.txt", uuid::Uuid::new_v4()));
        let src = source(path);
        assert!(matches!(
            src.endpoints().await,
            Err(FetchError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn empty_fallback_is_unavailable() {
        let path = temp_file("\n# nothing here\n");
        let src = source(path.clone());
        assert!(matches!(
            src.refresh().await,
            Err(FetchError::Unavailable(_))
        ));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn remote_list_is_cached_until_refresh() {
        let (url, hits) = serve_list(REMOTE_LIST).await;
        let src = remote_source(url);

        let urls = src.endpoints().await.unwrap();
        assert_eq!(
            urls.as_slice(),
            ["https://a.example/exec", "https://b.example/exec"]
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // 第二次命中缓存
        src.endpoints().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let status = src.cache_status().await;
        assert_eq!(status.urls_cached, 2);
        assert!(status.last_fetch.is_some());

        let urls = src.refresh().await.unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_download() {
        let (url, hits) = serve_list(REMOTE_LIST).await;
        let src = remote_source(url);

        let results = futures::future::join_all((0..8).map(|_| src.endpoints())).await;
        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|v| v.len() == 2)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_list_without_https_lines_falls_back_to_local_file() {
        let (url, hits) = serve_list("http://plain.example/exec\n").await;
        let path = temp_file("https://local.example/exec\n");
        let src = DriveSource::new(
            url,
            path.clone(),
            Duration::from_secs(300),
            Duration::from_secs(5),
            "",
        )
        .unwrap();

        let urls = src.endpoints().await.unwrap();
        assert_eq!(urls.as_slice(), ["https://local.example/exec"]);
        assert_eq!(src.cache_status().await.urls_cached, 0);

        // 备用结果不缓存，下一次仍先访问远程
        src.endpoints().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_file(path);
    }
}
