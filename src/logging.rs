//! 日志初始化
//!
//! 库代码只调用 `tracing` 宏，订阅者由二进制程序或测试安装。

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 安装控制台日志，级别取自 `LOG_LEVEL` 或 `RUST_LOG`，默认 `warn`
///
/// 多次调用只生效一次；已有全局订阅者时保留原订阅者
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = log_level();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(level.clone())),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
        tracing::debug!(level = %level, "logging initialized");
    });
}

fn log_level() -> String {
    std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string())
}
