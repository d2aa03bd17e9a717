use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{config::Settings, error::Result};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// 配置文件监听句柄
pub struct ConfigWatcher {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// 停止监听并等待监听任务退出
    pub async fn stop(self) {
        if self.stop_tx.send(()).is_err() {
            debug!("Config watcher already stopped");
        }
        if let Err(e) = self.task.await {
            error!("Config watcher task failed: {:?}", e);
        }
        info!("Config watcher stopped");
    }
}

/// 启动配置文件监听
///
/// 监听配置文件所在目录，编辑器以替换文件的方式保存时也能收到事件。
/// 500ms 内的连续事件合并为一次，之后重新读取配置并交给 `on_change`，
/// 读取或校验失败时 `on_change` 收到错误。
pub fn start_config_watcher<F, Fut>(
    config_path: impl AsRef<Path>,
    on_change: F,
) -> Result<ConfigWatcher>
where
    F: Fn(Result<Settings>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let config_path = config_path.as_ref().to_owned();
    let file_name = config_path.file_name().map(|n| n.to_owned());
    let watch_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |event| {
        // 接收端已关闭说明监听已停止
        let _ = tx.send(event);
    })?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    info!("Watching config file: {:?}", config_path);

    let (stop_tx, mut stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let _watcher = watcher;
        loop {
            let event = tokio::select! {
                _ = &mut stop_rx => break,
                event = rx.recv() => event,
            };
            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!("Watch error: {:?}", e);
                    continue;
                }
                None => {
                    error!("Watcher channel disconnected");
                    break;
                }
            };

            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref());
            if !touches_config || matches!(event.kind, EventKind::Access(_)) {
                continue;
            }

            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            info!("Config file changed: {:?}", config_path);
            on_change(Settings::new(&config_path.to_string_lossy())).await;
        }
    });

    Ok(ConfigWatcher { stop_tx, task })
}
