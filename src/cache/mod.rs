//! 版本化的持久化缓存
//!
//! 每个 bucket 对应一个缓存版本，持久化为存储目录下的一个子目录，
//! 每个缓存条目是其中的一个 JSON 文件。内存中保留一份完整索引，
//! 读操作不会访问磁盘。

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub mod entry;

pub use entry::{CacheKey, CachedResponse, ResponseType};
use entry::StoredEntry;

/// 临时文件序号，保证并发写入同一条目时临时文件互不覆盖
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// bucket 名称会作为目录名使用，只允许 `[A-Za-z0-9._-]`
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidBucketName(name.to_string()))
    }
}

/// 一个命名的缓存桶
#[derive(Debug)]
pub struct Bucket {
    name: String,
    dir: Option<PathBuf>,
    entries: DashMap<CacheKey, CachedResponse>,
}

impl Bucket {
    fn new(name: &str, dir: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir,
            entries: DashMap::new(),
        }
    }

    /// 从磁盘加载 bucket，损坏的条目会被删除
    async fn load(name: &str, dir: PathBuf) -> Result<Self> {
        let bucket = Self::new(name, Some(dir.clone()));
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(file) = read_dir.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                // 上次异常退出遗留的临时文件
                debug!("Remove stray file {:?}", path);
                let _ = fs::remove_file(&path).await;
                continue;
            }
            match read_entry(&path).await {
                Ok((key, response)) => {
                    bucket.entries.insert(key, response);
                }
                Err(e) => {
                    warn!("Drop unreadable cache entry {:?}: {}", path, e);
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
        debug!("Bucket {} loaded with {} entries", name, bucket.entries.len());
        Ok(bucket)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn match_key(&self, key: &CacheKey) -> Option<CachedResponse> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// 写入缓存条目，先落盘再更新索引；同一个键并发写入时后写者覆盖
    pub async fn put(&self, key: CacheKey, response: CachedResponse) -> Result<()> {
        if !key.is_get() {
            return Err(Error::NotCacheable(key.method));
        }
        if let Some(dir) = &self.dir {
            let stored = StoredEntry::encode(&key, &response);
            let content = serde_json::to_vec(&stored)?;
            let path = dir.join(key.file_name());
            let tmp = dir.join(format!(
                "{}.tmp{}",
                key.file_name(),
                TMP_SEQ.fetch_add(1, Ordering::Relaxed)
            ));
            fs::write(&tmp, content).await?;
            if let Err(e) = fs::rename(&tmp, &path).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        }
        self.entries.insert(key, response);
        Ok(())
    }

    pub async fn keys(&self) -> Vec<CacheKey> {
        let mut keys = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.entries.remove(key).is_some();
        if let Some(dir) = &self.dir {
            match fs::remove_file(dir.join(key.file_name())).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

async fn read_entry(path: &Path) -> Result<(CacheKey, CachedResponse)> {
    let content = fs::read(path).await?;
    let stored: StoredEntry = serde_json::from_slice(&content)?;
    stored.decode()
}

/// 所有 bucket 的集合
#[derive(Debug, Default)]
pub struct CacheStorage {
    root: Option<PathBuf>,
    buckets: DashMap<String, Arc<Bucket>>,
}

impl CacheStorage {
    /// 仅保存在内存中的存储，主要用于测试
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 打开持久化目录，并加载上次运行留下的所有 bucket
    pub async fn open_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let buckets = DashMap::new();
        let mut read_dir = fs::read_dir(&root).await?;
        while let Some(item) = read_dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_bucket_name(&name).is_err() {
                warn!("Ignore unknown directory {:?} in cache store", item.path());
                continue;
            }
            let bucket = Bucket::load(&name, item.path()).await?;
            buckets.insert(name, Arc::new(bucket));
        }
        info!("Cache store {:?} opened with {} buckets", root, buckets.len());

        Ok(Self {
            root: Some(root),
            buckets,
        })
    }

    /// 打开 bucket，不存在时创建
    pub async fn open(&self, name: &str) -> Result<Arc<Bucket>> {
        if let Some(bucket) = self.buckets.get(name) {
            return Ok(bucket.clone());
        }
        validate_bucket_name(name)?;

        let dir = match &self.root {
            Some(root) => {
                let dir = root.join(name);
                fs::create_dir_all(&dir).await?;
                Some(dir)
            }
            None => None,
        };
        let bucket = self
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bucket::new(name, dir)))
            .clone();
        debug!("Bucket {} opened", name);
        Ok(bucket)
    }

    /// 获取已存在的 bucket，不会创建
    pub fn get(&self, name: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(name).map(|bucket| bucket.clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut names = self
            .buckets
            .iter()
            .map(|bucket| bucket.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.buckets.remove(name).is_some();
        if let Some(root) = &self.root
            && validate_bucket_name(name).is_ok()
        {
            match fs::remove_dir_all(root.join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// 删除所有 bucket，返回删除的数量
    pub async fn clear(&self) -> Result<usize> {
        let names = self.keys().await;
        let mut count = 0;
        for name in names {
            if self.delete(&name).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}
