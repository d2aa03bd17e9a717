use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use axum_server::Handle;
use http::StatusCode;
use parking_lot::RwLock;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info};
use url::Url;

use crate::{
    config::SettingServer,
    consts::{EVENTS_PATH, MAX_BODY_SIZE, MESSAGE_PATH, STATUS_PATH},
    middlewares::{add_cache_version, add_version, logging_route},
    worker::OfflineWorker,
};

pub mod control;
pub mod error;
// 拦截所有非控制通道的请求
pub mod intercept;

/// 所有 handler 共享的状态
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<OfflineWorker>,
    /// 相对路径请求补全成完整地址时使用的源站
    origin: Arc<RwLock<Url>>,
}

impl AppState {
    pub fn new(worker: Arc<OfflineWorker>, origin: Url) -> Self {
        Self {
            worker,
            origin: Arc::new(RwLock::new(origin)),
        }
    }

    pub fn origin(&self) -> Url {
        self.origin.read().clone()
    }

    pub fn set_origin(&self, origin: Url) {
        *self.origin.write() = origin;
    }
}

pub fn make_router(server: &SettingServer, state: AppState) -> Router {
    let router = Router::new()
        .route(MESSAGE_PATH, post(control::message))
        .route(EVENTS_PATH, get(control::events))
        .route(STATUS_PATH, get(control::status))
        .fallback(intercept::serve)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(add_version))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    add_cache_version,
                ))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Duration::from_secs(server.timeout.into()),
                )),
        )
        .with_state(state);

    logging_route(router)
}

pub async fn make_server(
    server: &SettingServer,
    state: AppState,
) -> anyhow::Result<Handle<SocketAddr>> {
    debug!("make_server start with {:?}", server);
    let router = make_router(server, state);

    let addr = format!("{}:{}", server.ip, server.port);
    let addr: SocketAddr = addr.parse()?;

    let handle = Handle::new();
    let handle_clone = handle.clone();

    // 生成一个任务来运行服务器
    tokio::spawn(async move {
        info!("Listening on http://{}", addr);
        if let Err(e) = axum_server::bind(addr)
            .handle(handle_clone)
            .serve(router.into_make_service())
            .await
        {
            error!("Server on {} stopped: {:?}", addr, e);
        }
    });

    Ok(handle)
}

/// 优雅关闭服务器，正在处理的请求有 30 秒时间完成
pub fn shutdown_server(handle: &Handle<SocketAddr>) {
    handle.graceful_shutdown(Some(Duration::from_secs(30)));
    info!("Server has been signaled to shut down");
}
