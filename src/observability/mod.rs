//! 可观测性：tracing 订阅器初始化
//!
//! 日志级别由 RUST_LOG 控制，未设置时为 info。宿主程序启动时调用一次 init。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_default("info");
}

/// RUST_LOG 未设置或无法解析时使用 default_directive；重复调用只有第一次生效
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Tracing initialized");
    }
}
