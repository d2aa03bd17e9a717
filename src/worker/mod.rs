//! 离线缓存拦截器
//!
//! 负责缓存版本的安装、激活，请求拦截以及手动控制消息。

use std::{str::FromStr, sync::Arc};

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    cache::{CacheKey, CacheStorage, CachedResponse},
    config::SettingCache,
    error::{Error, Result},
    network::{Fetch, FetchRequest},
};

pub mod clients;
pub mod intercept;
pub mod policy;

pub use clients::{ClientHandle, ClientInfo, ClientMessage, Clients};
pub use intercept::{Interception, Served, Source};
pub use policy::{DenyList, HostSet, Policy, Strategy};

#[derive(Debug, Default)]
struct Registration {
    active: Option<Arc<Policy>>,
    waiting: Option<Arc<Policy>>,
}

/// 安装结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// 安装完成并已激活
    Activated(ActivationReport),
    /// 安装完成，等待所有客户端断开或收到 skipWaiting
    Waiting { version: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivationReport {
    pub version: String,
    pub deleted_buckets: Vec<String>,
    pub purged_entries: usize,
    pub claimed_clients: usize,
    pub notified_clients: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub buckets: Vec<String>,
    pub clients: usize,
    pub controlled: usize,
}

/// 应用发送的控制消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// 立即激活等待中的版本
    SkipWaiting,
    /// 删除所有缓存
    ClearCache,
}

impl FromStr for ControlMessage {
    type Err = Error;

    /// 接受纯文本或 JSON 字符串，如 `skipWaiting` 或 `"skipWaiting"`
    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let value = if raw.starts_with('"') {
            serde_json::from_str::<String>(raw)?
        } else {
            raw.to_string()
        };
        match value.as_str() {
            "skipWaiting" => Ok(ControlMessage::SkipWaiting),
            "clearCache" => Ok(ControlMessage::ClearCache),
            _ => Err(Error::UnknownMessage(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MessageOutcome {
    Activated(ActivationReport),
    NothingWaiting,
    Cleared { buckets: usize },
}

pub struct OfflineWorker {
    storage: Arc<CacheStorage>,
    network: Arc<dyn Fetch>,
    clients: Arc<Clients>,
    state: RwLock<Registration>,
}

impl OfflineWorker {
    pub fn new(storage: Arc<CacheStorage>, network: Arc<dyn Fetch>) -> Self {
        Self {
            storage,
            network,
            clients: Arc::new(Clients::new()),
            state: RwLock::new(Registration::default()),
        }
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.clients
    }

    pub fn active_policy(&self) -> Option<Arc<Policy>> {
        self.state.read().active.clone()
    }

    pub fn active_version(&self) -> Option<String> {
        self.state.read().active.as_ref().map(|p| p.version.clone())
    }

    pub fn waiting_version(&self) -> Option<String> {
        self.state.read().waiting.as_ref().map(|p| p.version.clone())
    }

    /// 连接一个新的客户端；已有激活版本时新客户端直接被接管
    pub fn attach_client(&self, user_agent: Option<String>) -> ClientHandle {
        let controlled = self.state.read().active.is_some();
        self.clients.attach(user_agent, controlled)
    }

    /// 安装一个缓存版本
    ///
    /// 先从网络获取全部静态资源，任意一个失败则整个安装失败，
    /// 之前激活的版本保持不变。全部成功后写入该版本的 bucket，
    /// 并成为等待中的版本。配置了 `skip_waiting` 或当前没有客户端时立即激活。
    pub async fn install(&self, policy: Policy) -> Result<InstallOutcome> {
        let version = policy.version.clone();
        info!("Installing cache version {}", version);

        let fetches = policy
            .assets
            .iter()
            .map(|url| self.fetch_asset(&policy, url));
        let responses = try_join_all(fetches).await.map_err(|reason| {
            error!("Cache install failed: {}", reason);
            Error::Install {
                version: version.clone(),
                reason,
            }
        })?;

        let bucket = self.storage.open(&version).await?;
        for (url, response) in responses {
            bucket.put(CacheKey::get(&url), response).await?;
        }
        info!(
            "Cache version {} installed with {} assets",
            version,
            policy.assets.len()
        );

        let skip_waiting = policy.skip_waiting;
        self.state.write().waiting = Some(Arc::new(policy));

        if skip_waiting || self.clients.count() == 0 {
            let report = self.promote_waiting().await?;
            return Ok(report.map_or(
                InstallOutcome::Waiting {
                    version: version.clone(),
                },
                InstallOutcome::Activated,
            ));
        }
        info!("Cache version {} is waiting", version);
        Ok(InstallOutcome::Waiting { version })
    }

    async fn fetch_asset(
        &self,
        policy: &Policy,
        url: &Url,
    ) -> Result<(Url, CachedResponse), String> {
        let request = FetchRequest::get(url.clone());
        let response = self
            .network
            .fetch(request)
            .await
            .map_err(|e| format!("{url}: {e}"))?;
        if !response.status.is_success() {
            return Err(format!("{url}: status {}", response.status));
        }
        let response_type = intercept::response_type(policy, &response.url, false);
        Ok((
            url.clone(),
            CachedResponse::new(
                response.status,
                response.headers,
                response.body,
                response_type,
            ),
        ))
    }

    /// 激活等待中的版本；没有等待中的版本时，对当前激活版本重新执行清理
    pub async fn activate(&self) -> Result<Option<ActivationReport>> {
        if let Some(report) = self.promote_waiting().await? {
            return Ok(Some(report));
        }
        let Some(policy) = self.active_policy() else {
            return Ok(None);
        };
        self.run_activation(&policy, false).await.map(Some)
    }

    async fn promote_waiting(&self) -> Result<Option<ActivationReport>> {
        let policy = {
            let mut state = self.state.write();
            let Some(policy) = state.waiting.take() else {
                return Ok(None);
            };
            state.active = Some(policy.clone());
            policy
        };
        info!("Cache version {} activated", policy.version);
        self.run_activation(&policy, true).await.map(Some)
    }

    async fn run_activation(&self, policy: &Policy, notify: bool) -> Result<ActivationReport> {
        let mut report = ActivationReport {
            version: policy.version.clone(),
            ..Default::default()
        };

        // 等待中的版本还没激活，它的预缓存要保留
        let waiting = self.waiting_version();
        for name in self.storage.keys().await {
            if name != policy.version && waiting.as_deref() != Some(name.as_str()) {
                info!("Deleting old cache: {}", name);
                self.storage.delete(&name).await?;
                report.deleted_buckets.push(name);
            }
        }

        if !policy.deny.is_empty()
            && let Some(bucket) = self.storage.get(&policy.version)
        {
            for key in bucket.keys().await {
                if policy.deny.matches_str(&key.url) && bucket.delete(&key).await? {
                    info!("Purged denied entry {} from {}", key.url, policy.version);
                    report.purged_entries += 1;
                }
            }
        }

        report.claimed_clients = self.clients.claim();
        if notify && policy.notify_clients {
            report.notified_clients = self.clients.post_message(ClientMessage::UpdateAvailable {
                version: policy.version.clone(),
            });
        }
        debug!("Activation report: {:?}", report);
        Ok(report)
    }

    pub async fn handle_message(&self, message: ControlMessage) -> Result<MessageOutcome> {
        info!("Control message {:?}", message);
        match message {
            ControlMessage::SkipWaiting => Ok(match self.promote_waiting().await? {
                Some(report) => MessageOutcome::Activated(report),
                None => MessageOutcome::NothingWaiting,
            }),
            ControlMessage::ClearCache => {
                let buckets = self.storage.clear().await?;
                info!("Cleared {} caches", buckets);
                Ok(MessageOutcome::Cleared { buckets })
            }
        }
    }

    /// 应用新的缓存配置
    ///
    /// 版本变化时安装新版本；版本不变时替换当前策略并重新执行清理。
    pub async fn update(&self, settings: &SettingCache) -> Result<Option<InstallOutcome>> {
        let policy = Policy::from_settings(settings)?;
        let current = self.active_version();
        if current.as_deref() == Some(policy.version.as_str()) {
            debug!("Cache version {} unchanged, refreshing policy", policy.version);
            let policy = Arc::new(policy);
            self.state.write().active = Some(policy.clone());
            self.run_activation(&policy, false).await?;
            return Ok(None);
        }
        self.install(policy).await.map(Some)
    }

    /// 客户端全部断开后激活等待中的版本
    pub fn spawn_idle_activation(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = self.clone();
        let mut count = self.clients.watch_count();
        tokio::spawn(async move {
            while count.changed().await.is_ok() {
                let idle = *count.borrow_and_update() == 0;
                if idle && worker.waiting_version().is_some() {
                    if let Err(e) = worker.promote_waiting().await {
                        warn!("Failed to activate waiting version: {}", e);
                    }
                }
            }
        })
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            active: self.active_version(),
            waiting: self.waiting_version(),
            buckets: self.storage.keys().await,
            clients: self.clients.count(),
            controlled: self.clients.controlled(),
        }
    }
}
