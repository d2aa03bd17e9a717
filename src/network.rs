use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, Method, StatusCode};
use reqwest::{Client, redirect::Policy};
use tracing::debug;
use url::Url;

use crate::error::Result;

/// 发往网络的请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// 是否跟随重定向；直接转发的请求把重定向原样交还给客户端
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            follow_redirects: true,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// 请求是否以 no-cors 模式发出（`Sec-Fetch-Mode: no-cors`）
    pub fn is_no_cors(&self) -> bool {
        self.headers
            .get("sec-fetch-mode")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no-cors"))
    }
}

/// 网络返回的响应
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// 跟随重定向之后的最终地址
    pub url: Url,
    pub redirected: bool,
}

/// 网络请求失败（离线、DNS、TLS、超时等）
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("fetch failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Other(err.to_string())
        }
    }
}

/// Network access used by the interceptor. Swapped for a stub in tests.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// 基于 reqwest 的网络实现
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    /// 不跟随重定向的客户端
    direct: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().build()?;
        let direct = Client::builder().redirect(Policy::none()).build()?;
        Ok(Self {
            client,
            direct,
            timeout,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!("fetch {} {}", request.method, request.url);
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.direct
        };
        let mut builder = client
            .request(request.method, request.url.clone())
            .timeout(self.timeout);
        for (name, value) in request.headers.iter() {
            if !is_exclude_header(name) && *name != http::header::ACCEPT_ENCODING {
                builder = builder.header(name.clone(), value.clone());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let mut headers = HeaderMap::new();
        copy_headers(response.headers(), &mut headers);
        headers.remove(http::header::CONTENT_LENGTH);
        let body = response.bytes().await?;

        Ok(FetchResponse {
            status,
            headers,
            body,
            redirected: url != request.url,
            url,
        })
    }
}

/// 检查给定的头部是否应该在转发时被排除。
/// 像 "host"、"connection" 等逐跳头部通常会被排除，以避免冲突或安全问题。
pub fn is_exclude_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "proxy-authenticate"
            | "upgrade"
            | "proxy-authorization"
            | "proxy-connection"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
            | "trailer"
    )
}

/// 将头部从一个 `HeaderMap` 复制到另一个，排除在 `is_exclude_header` 中指定的头部。
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if !is_exclude_header(name) {
            to.append(name.clone(), value.clone());
        }
    }
}
