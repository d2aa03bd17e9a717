use std::collections::BTreeSet;

use http::{HeaderMap, Method, header::ACCEPT};
use url::Url;

use crate::{
    config::SettingCache,
    error::{Error, Result},
};

/// 拒绝访问的路径集合
///
/// 每一项都是完整的 URL 路径（如 `/share-modal.js`），只做精确匹配，
/// 避免子串匹配误伤正常路径。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenyList {
    paths: BTreeSet<String>,
}

impl DenyList {
    /// 校验并构建拒绝列表
    ///
    /// 路径必须以 `/` 开头，不能包含查询参数、片段或空白字符，
    /// 也不能是根路径 `/`，且不能重复。
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut paths = BTreeSet::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !pattern.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "deny pattern {pattern:?} must start with '/'"
                )));
            }
            if pattern == "/" {
                return Err(Error::InvalidConfig(
                    "deny pattern '/' would reject the whole app".into(),
                ));
            }
            if pattern.contains(['?', '#']) || pattern.chars().any(char::is_whitespace) {
                return Err(Error::InvalidConfig(format!(
                    "deny pattern {pattern:?} must be a plain path"
                )));
            }
            if !paths.insert(pattern.to_string()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate deny pattern {pattern:?}"
                )));
            }
        }
        Ok(Self { paths })
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.paths.contains(url.path())
    }

    /// Match a stored cache key, which is a full URL string.
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| self.matches(&url))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// 域名集合，域名本身及其子域名都会命中
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSet {
    hosts: Vec<String>,
}

impl HostSet {
    pub fn new<S: AsRef<str>>(hosts: &[S]) -> Self {
        let hosts = hosts
            .iter()
            .map(|h| h.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.hosts.iter().any(|entry| {
            host == *entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// 请求的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 命中拒绝列表，直接返回 404
    Reject,
    /// 不拦截，原样转发
    PassThrough,
    CacheFirst,
    NetworkFirst,
}

/// 某一个缓存版本的完整策略
#[derive(Debug, Clone)]
pub struct Policy {
    pub version: String,
    pub origin: Url,
    pub assets: Vec<Url>,
    pub offline_page: Option<Url>,
    pub deny: DenyList,
    pub bypass_hosts: HostSet,
    pub network_first_hosts: HostSet,
    pub skip_waiting: bool,
    pub notify_clients: bool,
}

impl Policy {
    pub fn from_settings(settings: &SettingCache) -> Result<Self> {
        settings.validate()?;
        let origin = settings.origin_url()?;
        let assets = settings
            .assets
            .iter()
            .map(|asset| origin.join(asset))
            .collect::<Result<Vec<_>, _>>()?;
        let offline_page = settings
            .offline_page
            .as_ref()
            .map(|page| origin.join(page))
            .transpose()?;

        Ok(Self {
            version: settings.version.clone(),
            origin,
            assets,
            offline_page,
            deny: DenyList::new(&settings.deny)?,
            bypass_hosts: HostSet::new(&settings.bypass_hosts),
            network_first_hosts: HostSet::new(&settings.network_first_hosts),
            skip_waiting: settings.skip_waiting,
            notify_clients: settings.notify_clients,
        })
    }

    /// 按顺序判断请求的处理方式：
    /// 拒绝列表 -> 非 GET -> 绕过域名 -> 网络优先域名 -> 缓存优先
    pub fn strategy(&self, method: &Method, url: &Url) -> Strategy {
        if self.deny.matches(url) {
            return Strategy::Reject;
        }
        if *method != Method::GET {
            return Strategy::PassThrough;
        }
        if self.bypass_hosts.matches(url) {
            return Strategy::PassThrough;
        }
        if self.network_first_hosts.matches(url) {
            Strategy::NetworkFirst
        } else {
            Strategy::CacheFirst
        }
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}

/// 判断请求是否是 API 形式的请求，用于决定离线时返回 JSON 还是文本
pub fn is_api_request(url: &Url, headers: &HeaderMap) -> bool {
    let accepts_json = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("application/json"));
    let path = url.path();
    accepts_json || path.contains("/api/") || path.ends_with(".json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn policy() -> Policy {
        let settings = SettingCache {
            version: "tastescore-v2".to_string(),
            origin: "http://app.local:3000".to_string(),
            store: "./cache".to_string(),
            assets: vec!["./".to_string(), "./index.html".to_string()],
            offline_page: Some("./index.html".to_string()),
            deny: vec!["/share-modal.js".to_string()],
            bypass_hosts: vec!["supabase.co".to_string()],
            network_first_hosts: vec![
                "api.tastescore.io".to_string(),
                "fonts.googleapis.com".to_string(),
            ],
            skip_waiting: true,
            notify_clients: true,
            fetch_timeout: 30,
        };
        Policy::from_settings(&settings).unwrap()
    }

    #[test]
    fn test_deny_list_exact_path() {
        let deny = DenyList::new(&["/share-modal.js"]).unwrap();
        assert!(deny.matches(&url("http://app.local/share-modal.js")));
        assert!(deny.matches(&url("http://app.local/share-modal.js?v=2")));
        // 精确匹配，不再误伤相似路径
        assert!(!deny.matches(&url("http://app.local/share-modal.json")));
        assert!(!deny.matches(&url("http://app.local/js/share-modal.js")));
        assert!(deny.matches_str("http://cdn.local/share-modal.js"));
        assert!(!deny.matches_str("not a url"));
    }

    #[test]
    fn test_deny_list_validation() {
        assert!(DenyList::new(&["share-modal.js"]).is_err());
        assert!(DenyList::new(&["/"]).is_err());
        assert!(DenyList::new(&["/a.js?x=1"]).is_err());
        assert!(DenyList::new(&["/a b.js"]).is_err());
        assert!(DenyList::new(&["/a.js", "/a.js"]).is_err());
        assert!(DenyList::new::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_host_set_subdomains() {
        let hosts = HostSet::new(&["supabase.co", ".Fonts.gstatic.com"]);
        assert!(hosts.matches(&url("https://supabase.co/rest")));
        assert!(hosts.matches(&url("https://xyz.supabase.co/rest/v1/scores")));
        assert!(hosts.matches(&url("https://fonts.gstatic.com/s/roboto.woff2")));
        assert!(!hosts.matches(&url("https://notsupabase.co/")));
        assert!(!hosts.matches(&url("https://supabase.com/")));
    }

    #[test]
    fn test_policy_resolves_relative_paths() {
        let policy = policy();
        assert_eq!(policy.assets[0].as_str(), "http://app.local:3000/");
        assert_eq!(policy.assets[1].as_str(), "http://app.local:3000/index.html");
        assert_eq!(
            policy.offline_page.as_ref().map(Url::as_str),
            Some("http://app.local:3000/index.html")
        );
    }

    #[test]
    fn test_strategy_order() {
        let policy = policy();

        // 拒绝列表优先于方法判断
        assert_eq!(
            policy.strategy(&Method::POST, &url("http://app.local:3000/share-modal.js")),
            Strategy::Reject
        );
        assert_eq!(
            policy.strategy(&Method::POST, &url("http://app.local:3000/index.html")),
            Strategy::PassThrough
        );
        assert_eq!(
            policy.strategy(&Method::GET, &url("https://abc.supabase.co/rest/v1/dishes")),
            Strategy::PassThrough
        );
        assert_eq!(
            policy.strategy(&Method::GET, &url("https://api.tastescore.io/v1/search")),
            Strategy::NetworkFirst
        );
        assert_eq!(
            policy.strategy(&Method::GET, &url("http://app.local:3000/app.js")),
            Strategy::CacheFirst
        );
    }

    #[test]
    fn test_same_origin() {
        let policy = policy();
        assert!(policy.is_same_origin(&url("http://app.local:3000/x")));
        assert!(!policy.is_same_origin(&url("http://app.local:3001/x")));
        assert!(!policy.is_same_origin(&url("https://app.local:3000/x")));
    }

    #[test]
    fn test_is_api_request() {
        let empty = HeaderMap::new();
        assert!(is_api_request(&url("https://a.io/api/v1/x"), &empty));
        assert!(is_api_request(&url("https://a.io/data.json"), &empty));
        assert!(!is_api_request(&url("https://a.io/index.html"), &empty));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        assert!(is_api_request(&url("https://a.io/search"), &headers));
    }
}
