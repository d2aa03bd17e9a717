use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{CACHE_CONTROL, CONTENT_TYPE},
};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::{OfflineWorker, Policy, Strategy, policy::is_api_request};
use crate::{
    cache::{CacheKey, CachedResponse, ResponseType},
    network::{FetchError, FetchRequest, FetchResponse},
};

/// 响应来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// 缓存命中
    Cache,
    /// 来自网络
    Network,
    /// 离线兜底页面
    Fallback,
    /// 拦截器生成的响应
    Synthetic,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "hit",
            Source::Network => "miss",
            Source::Fallback => "fallback",
            Source::Synthetic => "synthetic",
        }
    }
}

/// 拦截器给出的响应
#[derive(Debug, Clone)]
pub struct Served {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: Source,
}

impl Served {
    fn cached(response: CachedResponse, source: Source) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source,
        }
    }

    fn network(response: FetchResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: Source::Network,
        }
    }

    fn synthetic(status: StatusCode, content_type: Option<&'static str>, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Self {
            status,
            headers,
            body,
            source: Source::Synthetic,
        }
    }

    /// 命中拒绝列表时的 404
    pub fn blocked() -> Self {
        Self::synthetic(StatusCode::NOT_FOUND, None, Bytes::new())
    }

    /// 网络不可用且没有缓存时的 503
    pub fn offline(api: bool) -> Self {
        if api {
            let body = json!({
                "error": "offline",
                "message": "Network unavailable and no cached response",
            });
            Self::synthetic(
                StatusCode::SERVICE_UNAVAILABLE,
                Some("application/json"),
                Bytes::from(body.to_string()),
            )
        } else {
            Self::synthetic(
                StatusCode::SERVICE_UNAVAILABLE,
                Some("text/plain; charset=utf-8"),
                Bytes::from_static(b"Offline"),
            )
        }
    }
}

/// 拦截结果
#[derive(Debug)]
pub enum Interception {
    Respond(Served),
    /// 不拦截，原请求交还给调用方直接转发
    PassThrough(FetchRequest),
}

/// 根据最终地址和请求模式判断响应类型
pub fn response_type(policy: &Policy, final_url: &Url, no_cors: bool) -> ResponseType {
    if policy.is_same_origin(final_url) {
        ResponseType::Basic
    } else if no_cors {
        ResponseType::Opaque
    } else {
        ResponseType::Cors
    }
}

impl OfflineWorker {
    /// 拦截一个请求
    pub async fn handle_fetch(&self, request: FetchRequest) -> Interception {
        let Some(policy) = self.active_policy() else {
            return Interception::PassThrough(request);
        };

        let strategy = policy.strategy(&request.method, &request.url);
        debug!("{} {} -> {:?}", request.method, request.url, strategy);
        match strategy {
            Strategy::Reject => Interception::Respond(Served::blocked()),
            Strategy::PassThrough => Interception::PassThrough(request),
            Strategy::CacheFirst => Interception::Respond(self.cache_first(&policy, request).await),
            Strategy::NetworkFirst => {
                Interception::Respond(self.network_first(&policy, request).await)
            }
        }
    }

    /// 直接转发不拦截的请求
    ///
    /// 重定向不跟随，原样交还给客户端。
    pub async fn forward(&self, mut request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.follow_redirects = false;
        self.network.fetch(request).await
    }

    async fn cache_first(&self, policy: &Policy, request: FetchRequest) -> Served {
        let key = CacheKey::get(&request.url);
        if let Some(hit) = self.lookup(policy, &key).await {
            debug!("Cache hit {}", key.url);
            return Served::cached(hit, Source::Cache);
        }

        let no_cors = request.is_no_cors();
        match self.network.fetch(request).await {
            Ok(response) => {
                let response_type = response_type(policy, &response.url, no_cors);
                // 只缓存 200 的同源或 opaque 响应，跳过错误页和重定向结果
                let cacheable = response.status == StatusCode::OK
                    && matches!(response_type, ResponseType::Basic | ResponseType::Opaque)
                    && !response.redirected;
                if cacheable {
                    self.store(policy, key, &response, response_type).await;
                }
                Served::network(response)
            }
            Err(e) => {
                warn!("Fetch {} failed: {}", key.url, e);
                if let Some(page) = &policy.offline_page
                    && let Some(fallback) = self.lookup(policy, &CacheKey::get(page)).await
                {
                    return Served::cached(fallback, Source::Fallback);
                }
                Served::offline(false)
            }
        }
    }

    async fn network_first(&self, policy: &Policy, request: FetchRequest) -> Served {
        let key = CacheKey::get(&request.url);
        let api = is_api_request(&request.url, &request.headers);
        let no_cors = request.is_no_cors();

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.status.is_success() && response.status != StatusCode::PARTIAL_CONTENT
                {
                    let response_type = response_type(policy, &response.url, no_cors);
                    self.store(policy, key, &response, response_type).await;
                }
                Served::network(response)
            }
            Err(e) => {
                warn!("Fetch {} failed: {}, trying cache", key.url, e);
                match self.lookup(policy, &key).await {
                    Some(hit) => Served::cached(hit, Source::Cache),
                    None => Served::offline(api),
                }
            }
        }
    }

    async fn lookup(&self, policy: &Policy, key: &CacheKey) -> Option<CachedResponse> {
        let bucket = self.storage.get(&policy.version)?;
        bucket.match_key(key).await
    }

    /// 写入缓存失败只记录日志，不影响返回给客户端的响应
    pub(super) async fn store(
        &self,
        policy: &Policy,
        key: CacheKey,
        response: &FetchResponse,
        response_type: ResponseType,
    ) {
        // 请求处理期间版本已切换，不再写入旧版本
        if !self.is_active(&policy.version) {
            debug!("Skip caching {} for retired version {}", key.url, policy.version);
            return;
        }
        let bucket = match self.storage.open(&policy.version).await {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!("Failed to cache response: {}", e);
                return;
            }
        };
        // open 期间可能刚完成激活，此时 open 会把已删除的 bucket 重新建出来
        if !self.is_active(&policy.version) {
            self.discard_retired(&policy.version).await;
            return;
        }
        let cached = CachedResponse::new(
            response.status,
            response.headers.clone(),
            response.body.clone(),
            response_type,
        );
        if let Err(e) = bucket.put(key, cached).await {
            warn!("Failed to cache response: {}", e);
        }
        if !self.is_active(&policy.version) {
            self.discard_retired(&policy.version).await;
        }
    }

    fn is_active(&self, version: &str) -> bool {
        self.active_version().as_deref() == Some(version)
    }

    async fn discard_retired(&self, version: &str) {
        if self.waiting_version().as_deref() == Some(version) || self.is_active(version) {
            return;
        }
        debug!("Dropping bucket {} recreated after retirement", version);
        if let Err(e) = self.storage.delete(version).await {
            warn!("Failed to drop retired bucket {}: {}", version, e);
        }
    }
}
