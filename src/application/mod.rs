use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use tracing::{debug, error, info, warn};

use crate::{
    cache::CacheStorage,
    config::{SettingServer, Settings},
    consts::{ARCH, COMMIT, COMPILER, NAME, OS, VERSION},
    http::{AppState, shutdown_server},
    network::HttpFetcher,
    utils::ConfigWatcher,
    worker::{InstallOutcome, OfflineWorker, Policy},
};

pub fn log_startup(settings: &Settings) {
    info!("{} v{} ({})", NAME, VERSION, COMMIT);
    info!("Compiler: {}", COMPILER);
    info!("OS: {} {}", OS, ARCH);
    debug!("Configuration: {:?}", settings);
}

/// 打开缓存目录，创建拦截器并安装配置中的版本
///
/// 安装失败不影响启动：拦截器保持无激活版本，所有请求直接转发，
/// 等待下一次配置变更重新安装。
pub async fn bootstrap(settings: &Settings) -> Result<AppState> {
    let storage = CacheStorage::open_dir(&settings.cache.store)
        .await
        .with_context(|| format!("open cache store {}", settings.cache.store))?;
    let network = HttpFetcher::new(settings.cache.fetch_timeout())?;
    let worker = Arc::new(OfflineWorker::new(Arc::new(storage), Arc::new(network)));
    worker.spawn_idle_activation();

    let origin = settings.cache.origin_url()?;
    let state = AppState::new(worker.clone(), origin);

    let policy = Policy::from_settings(&settings.cache)?;
    match worker.install(policy).await {
        Ok(outcome) => log_install(&outcome),
        Err(e) => error!("Initial install failed, serving from network: {}", e),
    }
    Ok(state)
}

fn log_install(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Activated(report) => info!(
            "Cache version {} active, {} old caches deleted",
            report.version,
            report.deleted_buckets.len()
        ),
        InstallOutcome::Waiting { version } => {
            info!("Cache version {} waiting for clients to close", version)
        }
    }
}

/// 处理配置文件变更的回调函数
///
/// 缓存配置立即生效；监听地址和网络超时需要重启。
pub async fn handle_config_change(
    result: crate::error::Result<Settings>,
    state: AppState,
    running: SettingServer,
) {
    let new_settings = match result {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to reload config file: {:?}", e);
            return;
        }
    };
    info!("Config file reloaded successfully");

    if new_settings.server != running {
        warn!(
            "Server settings changed to {:?}, restart to apply",
            new_settings.server
        );
    }

    match new_settings.cache.origin_url() {
        Ok(origin) => state.set_origin(origin),
        Err(e) => {
            error!("Invalid origin: {}", e);
            return;
        }
    }
    match state.worker.update(&new_settings.cache).await {
        Ok(Some(outcome)) => log_install(&outcome),
        Ok(None) => info!("Cache policy refreshed"),
        Err(e) => error!("Failed to apply cache settings: {}", e),
    }
}

/// 优雅关闭服务器和配置监听器
pub async fn shutdown_application(handle: Handle<SocketAddr>, watcher: ConfigWatcher) {
    info!("Received shutdown signal, closing server...");
    shutdown_server(&handle);
    watcher.stop().await;
    info!("Application shutdown complete");
}
