/// Data Intelligence Platform - 聊天客户端
/// 
/// 与分析后端保持 WebSocket 长连接，在控制台中收发对话

use tracing::info;

mod config;
mod console;
mod ws;

use ws::ClientSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenvy::dotenv().ok();
    let cfg = config::Config::from_env()?;

    // 初始化日志
    // 可以通过环境变量 RUST_LOG 设置日志级别，例如：
    // RUST_LOG=client=debug cargo run
    // 日志写到 stderr，避免与对话输出混在一起
    tracing_subscriber::fmt()
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动聊天客户端...");
    info!("🎯 Server: {}", cfg.server_ws_url);
    info!("📌 会话 ID: {}, 模式: {}", cfg.session_id, cfg.query_mode);

    let result = console::run(ClientSettings::from(&cfg), cfg.query_mode, cfg.session_id.clone()).await;

    info!("👋 客户端已退出");

    result
}
