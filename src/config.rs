use std::{fs, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::{
    cache::validate_bucket_name,
    consts::{
        assets_default, fetch_timeout_default, ip_default, log_folder_default, log_level_default,
        port_default, store_default, timeout_default, true_default,
    },
    error::{Error, Result},
    worker::DenyList,
};

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "log_level_default")]
    pub log_level: String,
    /// 日志文件夹，日志按天分割
    #[serde(default = "log_folder_default")]
    pub log_folder: String,
    #[serde(default)]
    pub server: SettingServer,
    pub cache: SettingCache,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SettingServer {
    #[serde(default = "ip_default")]
    pub ip: String,
    #[serde(default = "port_default")]
    pub port: u16,
    /// 请求处理超时时间（秒）
    #[serde(default = "timeout_default")]
    pub timeout: u16,
}

impl Default for SettingServer {
    fn default() -> Self {
        Self {
            ip: ip_default(),
            port: port_default(),
            timeout: timeout_default(),
        }
    }
}

/// 离线缓存配置
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SettingCache {
    /// 当前缓存版本，同时也是 bucket 名称
    pub version: String,
    /// 应用的源站地址，相对路径基于该地址解析
    pub origin: String,
    /// bucket 持久化目录
    #[serde(default = "store_default")]
    pub store: String,
    /// 安装时预缓存的静态资源
    #[serde(default = "assets_default")]
    pub assets: Vec<String>,
    /// 离线时的兜底页面
    pub offline_page: Option<String>,
    /// 直接拒绝的路径
    #[serde(default)]
    pub deny: Vec<String>,
    /// 不拦截的域名
    #[serde(default)]
    pub bypass_hosts: Vec<String>,
    /// 优先走网络的域名
    #[serde(default)]
    pub network_first_hosts: Vec<String>,
    #[serde(default = "true_default")]
    pub skip_waiting: bool,
    #[serde(default = "true_default")]
    pub notify_clients: bool,
    /// 网络请求超时时间（秒）
    #[serde(default = "fetch_timeout_default")]
    pub fetch_timeout: u16,
}

impl Settings {
    /// 读取并校验配置文件
    pub fn new(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.cache.validate()?;
        Ok(settings)
    }
}

impl SettingCache {
    /// Check every value that would otherwise fail at request time.
    pub fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.version)?;

        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }
        for asset in &self.assets {
            if asset.trim().is_empty() {
                return Err(Error::InvalidConfig("empty asset path".into()));
            }
            origin.join(asset)?;
        }
        if let Some(page) = &self.offline_page {
            origin.join(page)?;
        }

        DenyList::new(&self.deny)?;

        if self.fetch_timeout == 0 {
            return Err(Error::InvalidConfig("fetch_timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.origin)?)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
        [cache]
        version = "tastescore-v2"
        origin = "http://127.0.0.1:3000"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let settings = Settings::from_toml(MINIMAL).unwrap();

        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.timeout, 75);
        assert_eq!(settings.cache.store, "./cache");
        assert_eq!(
            settings.cache.assets,
            vec!["./", "./index.html", "./manifest.json"]
        );
        assert!(settings.cache.skip_waiting);
        assert!(settings.cache.notify_clients);
        assert_eq!(settings.cache.fetch_timeout(), Duration::from_secs(30));
        assert!(settings.cache.offline_page.is_none());
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            log_level = "debug"
            log_folder = "/tmp/tastecache"

            [server]
            ip = "0.0.0.0"
            port = 9000

            [cache]
            version = "tastescore-v3"
            origin = "https://tastescore.app"
            store = "/var/cache/tastecache"
            assets = ["./", "./index.html"]
            offline_page = "./index.html"
            deny = ["/share-modal.js"]
            bypass_hosts = ["supabase.co"]
            network_first_hosts = ["fonts.googleapis.com"]
            skip_waiting = false
            fetch_timeout = 5
            "#
        )
        .unwrap();

        let settings = Settings::new(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.server.ip, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.cache.version, "tastescore-v3");
        assert_eq!(settings.cache.deny, vec!["/share-modal.js"]);
        assert_eq!(settings.cache.bypass_hosts, vec!["supabase.co"]);
        assert!(!settings.cache.skip_waiting);
        assert_eq!(settings.cache.fetch_timeout, 5);
    }

    #[test]
    fn test_invalid_version_rejected() {
        let result = Settings::from_toml(
            r#"
            [cache]
            version = "../escape"
            origin = "http://127.0.0.1:3000"
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidBucketName(_))));
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let result = Settings::from_toml(
            r#"
            [cache]
            version = "v1"
            origin = "ftp://127.0.0.1"
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result = Settings::from_toml(
            r#"
            [cache]
            version = "v1"
            origin = "not a url"
            "#,
        );
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn test_invalid_deny_pattern_rejected() {
        let result = Settings::from_toml(
            r#"
            [cache]
            version = "v1"
            origin = "http://127.0.0.1:3000"
            deny = ["share-modal.js"]
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_fetch_timeout_rejected() {
        let result = Settings::from_toml(
            r#"
            [cache]
            version = "v1"
            origin = "http://127.0.0.1:3000"
            fetch_timeout = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_cache_section() {
        let result = Settings::from_toml("log_level = \"info\"");
        assert!(matches!(result, Err(Error::TomlDecode(_))));
    }
}
