//! 可观测性
//!
//! 日志初始化由宿主进程（Web 层）在启动时调用一次；RUST_LOG 可覆盖默认级别。
//! 工具调用的结构化审计行（tool_audit）经由 tracing 输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .with(fmt::layer())
        .init();
}
