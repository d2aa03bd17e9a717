use std::fmt::{Display, Formatter};

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};

/// 缓存键：请求方法 + URL（去掉片段）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }

    /// 持久化时使用的文件名
    pub fn file_name(&self) -> String {
        format!("{:x}.json", md5::compute(self.to_string()))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// 响应类型，对应浏览器 Response.type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// 同源响应
    Basic,
    /// 跨域响应
    Cors,
    /// no-cors 模式下的跨域响应
    Opaque,
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        response_type: ResponseType,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            response_type,
            stored_at: Utc::now(),
        }
    }
}

/// 磁盘上的缓存条目格式
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoredEntry {
    key: CacheKey,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    checksum: u32,
    response_type: ResponseType,
    stored_at: i64,
}

impl StoredEntry {
    pub(super) fn encode(key: &CacheKey, response: &CachedResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(value) => Some((name.to_string(), value.to_string())),
                Err(_) => {
                    warn!("Skip non-ascii header {} for {}", name, key);
                    None
                }
            })
            .collect();

        Self {
            key: key.clone(),
            status: response.status.as_u16(),
            headers,
            body: STANDARD.encode(&response.body),
            checksum: crc32fast::hash(&response.body),
            response_type: response.response_type,
            stored_at: response.stored_at.timestamp_millis(),
        }
    }

    pub(super) fn decode(self) -> Result<(CacheKey, CachedResponse)> {
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|e| Error::Corrupted(format!("{}: {e}", self.key)))?;
        if crc32fast::hash(&body) != self.checksum {
            return Err(Error::Corrupted(format!("{}: checksum mismatch", self.key)));
        }

        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Corrupted(format!("{}: {e}", self.key)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                return Err(Error::Corrupted(format!("{}: bad header {name}", self.key)));
            };
            headers.append(name, value);
        }

        let stored_at = DateTime::from_timestamp_millis(self.stored_at).unwrap_or_else(Utc::now);

        Ok((
            self.key,
            CachedResponse {
                status,
                headers,
                body: Bytes::from(body),
                response_type: self.response_type,
                stored_at,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_cache_key_strips_fragment() {
        let url = Url::parse("http://app.local/index.html#top").unwrap();
        let key = CacheKey::get(&url);
        assert_eq!(key.url, "http://app.local/index.html");
        assert!(key.is_get());
        assert_eq!(key.to_string(), "GET http://app.local/index.html");
    }

    #[test]
    fn test_cache_key_file_name_stable() {
        let a = CacheKey::get(&Url::parse("http://app.local/a.js").unwrap());
        let b = CacheKey::get(&Url::parse("http://app.local/a.js#x").unwrap());
        let c = CacheKey::get(&Url::parse("http://app.local/b.js").unwrap());
        assert_eq!(a.file_name(), b.file_name());
        assert_ne!(a.file_name(), c.file_name());
        assert!(a.file_name().ends_with(".json"));
    }

    #[test]
    fn test_stored_entry_keeps_response() {
        let key = CacheKey::get(&Url::parse("http://app.local/index.html").unwrap());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let response = CachedResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(b"<html>TasteScore</html>"),
            ResponseType::Basic,
        );

        let json = serde_json::to_string(&StoredEntry::encode(&key, &response)).unwrap();
        let stored: StoredEntry = serde_json::from_str(&json).unwrap();
        let (decoded_key, decoded) = stored.decode().unwrap();

        assert_eq!(decoded_key, key);
        assert_eq!(decoded.status, StatusCode::OK);
        assert_eq!(decoded.body, response.body);
        assert_eq!(decoded.headers.get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(decoded.response_type, ResponseType::Basic);
        assert_eq!(
            decoded.stored_at.timestamp_millis(),
            response.stored_at.timestamp_millis()
        );
    }

    #[test]
    fn test_stored_entry_detects_corruption() {
        let key = CacheKey::get(&Url::parse("http://app.local/app.js").unwrap());
        let response = CachedResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"console.log(1)"),
            ResponseType::Basic,
        );
        let mut stored = StoredEntry::encode(&key, &response);
        stored.checksum ^= 1;
        assert!(matches!(stored.decode(), Err(Error::Corrupted(_))));
    }
}
