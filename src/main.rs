use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tastecache::{
    application::{bootstrap, handle_config_change, log_startup, shutdown_application},
    cli::Cli,
    http::make_server,
    utils::{init_logger, start_config_watcher},
};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = args.load_settings().with_context(|| "init config failed")?;

    let _guard = init_logger(settings.log_level.as_str(), settings.log_folder.as_str())
        .with_context(|| "init logger failed")?;
    log_startup(&settings);

    let state = bootstrap(&settings).await?;
    let handle = make_server(&settings.server, state.clone()).await?;

    // 启动配置文件监听
    let running = settings.server.clone();
    let config_path = args.config.clone();
    let watcher = start_config_watcher(&config_path, move |result| {
        let result = result.and_then(|s| args.apply(s));
        handle_config_change(result, state.clone(), running.clone())
    })?;

    info!("Server started");

    tokio::signal::ctrl_c().await?;
    shutdown_application(handle, watcher).await;

    Ok(())
}
