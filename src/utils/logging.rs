use std::str::FromStr;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self},
    layer::SubscriberExt,
};

const LOG_FILE_PREFIX: &str = "tastecache_log";

/// 初始化 Logger
///
/// 日志总是输出到控制台。`log_folder` 非空时同时写入该目录，按天分割；
/// 为空时不写文件，返回的 guard 为 `None`。
pub fn init_logger(log_level: &str, log_folder: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_subscriber, guard) = if log_folder.trim().is_empty() {
        (None, None)
    } else {
        let file_appender = tracing_appender::rolling::daily(log_folder, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    };

    let formatting_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout);

    let env_layer = EnvFilter::from_str(log_level).unwrap_or_else(|_| "info".into());

    let collector = tracing_subscriber::registry()
        .with(env_layer)
        .with(formatting_layer)
        .with(file_subscriber);
    tracing::subscriber::set_global_default(collector)
        .with_context(|| "to set a global collector")?;
    Ok(guard)
}
