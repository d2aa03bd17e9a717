//! 集成测试的公共辅助函数和工具

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use axum_server::Handle;
use serde_json::json;
use tempfile::TempDir;

use tastecache::{
    application::bootstrap,
    config::Settings,
    http::{AppState, make_server},
};

/// 模拟源站
pub struct Origin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    handle: Handle<SocketAddr>,
}

impl Origin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// 关闭源站，之后的请求都会连接失败
    pub async fn shutdown(&self) {
        self.handle.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn counted(State(hits): State<Arc<AtomicUsize>>, body: &'static str) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    body
}

pub async fn start_origin() -> Result<Origin> {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/",
            get(|s: State<Arc<AtomicUsize>>| counted(s, "<h1>TasteScore</h1>")),
        )
        .route(
            "/index.html",
            get(|s: State<Arc<AtomicUsize>>| counted(s, "<h1>TasteScore</h1>")),
        )
        .route(
            "/manifest.json",
            get(|s: State<Arc<AtomicUsize>>| async move {
                counted(s, "").await;
                Json(json!({ "name": "TasteScore" }))
            }),
        )
        .route(
            "/offline.html",
            get(|s: State<Arc<AtomicUsize>>| counted(s, "<p>You are offline</p>")),
        )
        .route(
            "/menu",
            get(|s: State<Arc<AtomicUsize>>| counted(s, "<ul><li>ramen</li></ul>")),
        )
        .route(
            "/admin",
            get(|s: State<Arc<AtomicUsize>>| counted(s, "secret")),
        )
        .route(
            "/api/scores",
            get(|s: State<Arc<AtomicUsize>>| async move {
                counted(s, "").await;
                Json(json!({ "scores": [4, 5] }))
            }),
        )
        .route(
            "/api/rate",
            post(|body: Bytes| async move {
                ([(CONTENT_TYPE, "application/octet-stream")], body).into_response()
            }),
        )
        .route(
            "/api/legacy",
            post(|s: State<Arc<AtomicUsize>>| async move {
                counted(s, "").await;
                Redirect::temporary("/api/rate")
            }),
        )
        .with_state(hits.clone());

    let handle = Handle::new();
    let server_handle = handle.clone();
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    tokio::spawn(async move {
        axum_server::bind(addr)
            .handle(server_handle)
            .serve(router.into_make_service())
            .await
    });
    let addr = handle
        .listening()
        .await
        .context("origin failed to listen")?;

    Ok(Origin { addr, hits, handle })
}

/// 被测的缓存代理
pub struct Proxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub client: reqwest::Client,
    handle: Handle<SocketAddr>,
    _store: TempDir,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    pub async fn message(&self, body: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/__sw/message"))
            .body(body.to_string())
            .send()
            .await?)
    }

    pub async fn status(&self) -> Result<serde_json::Value> {
        json(self.get("/__sw/status").await?).await
    }

    /// 与当前代理共用缓存目录的新配置
    pub fn settings(&self, origin: &Origin, version: &str, extra: &str) -> Result<Settings> {
        Ok(Settings::from_toml(&cache_config(
            origin,
            &self._store,
            version,
            extra,
        ))?)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

pub async fn json(response: reqwest::Response) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&response.text().await?)?)
}

/// 生成配置，`extra` 追加到 `[cache]` 段
pub fn cache_config(origin: &Origin, store: &TempDir, version: &str, extra: &str) -> String {
    format!(
        r#"
log_level = "debug"
log_folder = ""

[server]
ip = "127.0.0.1"
port = 0
timeout = 10

[cache]
version = "{version}"
origin = "{origin}"
store = "{store}"
assets = ["/", "/index.html", "/manifest.json", "/offline.html"]
fetch_timeout = 2
{extra}
"#,
        origin = origin.url(),
        store = store.path().display(),
    )
}

pub async fn start_proxy(origin: &Origin, version: &str, extra: &str) -> Result<Proxy> {
    let store = TempDir::new()?;
    let settings = Settings::from_toml(&cache_config(origin, &store, version, extra))?;
    let state = bootstrap(&settings).await?;
    let handle = make_server(&settings.server, state.clone()).await?;
    let addr = handle
        .listening()
        .await
        .context("proxy failed to listen")?;
    let client = reqwest::Client::builder().no_proxy().build()?;

    Ok(Proxy {
        addr,
        state,
        client,
        handle,
        _store: store,
    })
}
