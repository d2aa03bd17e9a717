use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// 推送给客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    UpdateAvailable { version: String },
}

/// 已连接的应用实例
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: u64,
    pub user_agent: Option<String>,
    /// 是否已被当前激活的版本接管
    pub controlled: bool,
    pub attached_at: DateTime<Local>,
}

/// 客户端注册表
///
/// 每个连接到事件流的应用实例都是一个客户端，断开时自动移除。
#[derive(Debug)]
pub struct Clients {
    next_id: AtomicU64,
    clients: DashMap<u64, ClientInfo>,
    tx: broadcast::Sender<ClientMessage>,
    count_tx: watch::Sender<usize>,
}

impl Default for Clients {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(16);
        let (count_tx, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            clients: DashMap::new(),
            tx,
            count_tx,
        }
    }
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(self: &Arc<Self>, user_agent: Option<String>, controlled: bool) -> ClientHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // 先订阅再登记，保证登记之后的广播一定能收到
        let rx = self.tx.subscribe();
        self.clients.insert(
            id,
            ClientInfo {
                id,
                user_agent,
                controlled,
                attached_at: Local::now(),
            },
        );
        self.count_tx.send_replace(self.clients.len());
        debug!("Client {} attached", id);
        ClientHandle {
            id,
            clients: self.clone(),
            rx,
        }
    }

    fn detach(&self, id: u64) {
        if self.clients.remove(&id).is_some() {
            self.count_tx.send_replace(self.clients.len());
            debug!("Client {} detached", id);
        }
    }

    pub fn match_all(&self) -> Vec<ClientInfo> {
        let mut clients = self
            .clients
            .iter()
            .map(|c| c.value().clone())
            .collect::<Vec<_>>();
        clients.sort_by_key(|c| c.id);
        clients
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn controlled(&self) -> usize {
        self.clients.iter().filter(|c| c.controlled).count()
    }

    /// 接管所有已连接的客户端，返回新接管的数量
    pub fn claim(&self) -> usize {
        let mut claimed = 0;
        for mut client in self.clients.iter_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// 广播消息，返回收到消息的客户端数量
    pub fn post_message(&self, message: ClientMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Watch the number of attached clients.
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }
}

/// 客户端连接句柄，drop 时自动断开
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    clients: Arc<Clients>,
    rx: broadcast::Receiver<ClientMessage>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 等待下一条广播消息，注册表关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, {} messages skipped", self.id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.clients.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_message_shape() {
        let message = ClientMessage::UpdateAvailable {
            version: "tastescore-v3".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "UPDATE_AVAILABLE", "version": "tastescore-v3" })
        );
    }

    #[tokio::test]
    async fn test_attach_detach_and_count() {
        let clients = Arc::new(Clients::new());
        let count = clients.watch_count();

        let a = clients.attach(Some("firefox".to_string()), false);
        let b = clients.attach(None, true);
        assert_eq!(clients.count(), 2);
        assert_eq!(*count.borrow(), 2);
        assert_eq!(clients.controlled(), 1);
        assert_ne!(a.id(), b.id());

        drop(a);
        assert_eq!(clients.count(), 1);
        assert_eq!(*count.borrow(), 1);
        assert_eq!(clients.match_all()[0].id, b.id());
    }

    #[test]
    fn test_client_info_serializes() {
        let clients = Arc::new(Clients::new());
        let _client = clients.attach(Some("safari".to_string()), true);

        let json = serde_json::to_value(clients.match_all()).unwrap();
        let info = &json[0];
        assert_eq!(info["user_agent"], "safari");
        assert_eq!(info["controlled"], true);
        let attached_at = info["attached_at"].as_str().unwrap();
        assert!(attached_at.parse::<DateTime<Local>>().is_ok());
    }

    #[tokio::test]
    async fn test_claim_and_broadcast() {
        let clients = Arc::new(Clients::new());
        let mut a = clients.attach(None, false);
        let mut b = clients.attach(None, false);

        assert_eq!(clients.claim(), 2);
        assert_eq!(clients.claim(), 0);
        assert_eq!(clients.controlled(), 2);

        let message = ClientMessage::UpdateAvailable {
            version: "v2".to_string(),
        };
        assert_eq!(clients.post_message(message.clone()), 2);
        assert_eq!(a.recv().await, Some(message.clone()));
        assert_eq!(b.recv().await, Some(message));
    }

    #[test]
    fn test_broadcast_without_clients() {
        let clients = Clients::new();
        let sent = clients.post_message(ClientMessage::UpdateAvailable {
            version: "v2".to_string(),
        });
        assert_eq!(sent, 0);
    }
}
