// === Jemalloc 全局分配器 ===
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod config;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod quota;
pub mod relay;
pub mod util;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{Router, middleware};
use chrono::Local;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing();

    let source = endpoint::DriveSource::from_config(&cfg).context("初始化端点列表来源失败")?;
    let client = delivery::WebAppClient::new(&cfg).context("初始化 WebAppClient 失败")?;
    let ledger = quota::UsageLedger::new(
        quota::Limits::new(cfg.daily_limit, cfg.soft_limit_percent),
        Local::now(),
    );
    let relay = relay::Relay::new(
        ledger,
        source,
        client,
        Duration::from_millis(cfg.dispatch_spacing_ms),
    );

    tracing::info!(
        "每个 WebApp 每日上限 {}，单发软阈值 {}%，批量上限 {}",
        cfg.daily_limit,
        cfg.soft_limit_percent,
        cfg.bulk_max_units
    );
    if cfg.endpoint_source_url().is_empty() {
        tracing::warn!(
            "未配置 SMTP_FILE_ID / ENDPOINT_SOURCE_URL，将只使用本地备用文件 {}",
            cfg.endpoint_fallback_file
        );
    }

    let state = Arc::new(gateway::AppState::new(cfg.clone(), relay));

    // 启动时后台预热端点列表；失败只记录日志，请求路径会再次尝试。
    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = state.relay.refresh().await {
                tracing::warn!("启动预加载 WebApp 地址失败: {e}");
            }
        });
    }

    // === 管理路由（需要 ADMIN_KEY）===
    let admin_routes = Router::new()
        .route("/reset", post(gateway::handle_reset))
        .route("/refresh", post(gateway::handle_refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gateway::admin_auth_middleware,
        ));

    let app = Router::new()
        .route("/", get(gateway::handle_index))
        .route("/health", get(gateway::handle_health))
        .route("/email", get(gateway::handle_email))
        .route("/bulk", post(gateway::handle_bulk))
        .route("/stats", get(gateway::handle_stats))
        .merge(admin_routes)
        .fallback(gateway::handle_not_found)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing() {
    // 依赖库日志默认控制在 warn，本项目自身日志至少为 info；
    // DEBUG 只控制请求/投递详细日志块，不影响这里的过滤器。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,mailrelay=info")
    } else if env.contains("mailrelay") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},mailrelay=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
