use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::record::{deadline_after, HostRecord};
use super::store::{Store, StoreError};

/// 条目默认存活时间
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 后台清理间隔
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// 带过期时间的解析结果缓存
///
/// 写入一律先删后插，因此每次 put 都会重置 TTL（负缓存也一样），读取不会续期。
/// 后台清理任务按固定间隔删除过期条目，`close` 返回后不再有任何后台写入。
pub struct Cache {
    store: Arc<dyn Store>,
    ttl: Duration,
    /// 停止请求携带一个私有的确认通道
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl Cache {
    /// 必须在 tokio 运行时内调用（会启动清理任务）
    pub fn new(store: Arc<dyn Store>, ttl: Duration, cleanup_interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        spawn_janitor(store.clone(), cleanup_interval, stop_rx);
        Self {
            store,
            ttl,
            stop_tx,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 不存在或已过期都返回 None
    pub fn get(&self, key: &str) -> Option<Arc<HostRecord>> {
        let record = self.store.get(key).ok()?;
        if record.is_expired(Instant::now()) {
            return None;
        }
        Some(record)
    }

    /// 空地址列表不做正缓存，按失败记录写入
    pub fn put_addrs(&self, key: &str, addrs: Vec<String>) -> Result<(), StoreError> {
        if addrs.is_empty() {
            return self.put_serv_fail(key);
        }
        self.replace(key, HostRecord::with_addrs(addrs, self.deadline()))
    }

    pub fn put_ptr(&self, key: &str, ptr: &str) -> Result<(), StoreError> {
        self.replace(key, HostRecord::with_ptr(ptr, self.deadline()))
    }

    pub fn put_serv_fail(&self, key: &str) -> Result<(), StoreError> {
        self.replace(key, HostRecord::serv_fail(self.deadline()))
    }

    /// 立即执行一轮过期清理，返回删除的条目数
    pub fn sweep_expired(&self) -> usize {
        sweep(self.store.as_ref())
    }

    /// 通知清理任务退出并等待确认。任务已退出时直接返回。
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_err() {
            debug!("dns cache janitor already stopped");
            return;
        }
        let _ = ack_rx.await;
    }

    fn deadline(&self) -> Instant {
        deadline_after(Instant::now(), self.ttl)
    }

    fn replace(&self, key: &str, record: HostRecord) -> Result<(), StoreError> {
        match self.store.del(key) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        self.store.put(key, record)
    }
}

fn spawn_janitor(
    store: Arc<dyn Store>,
    interval: Duration,
    mut stop_rx: mpsc::Receiver<oneshot::Sender<()>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // 跳过首次立即触发

        loop {
            tokio::select! {
                biased;
                req = stop_rx.recv() => {
                    // None 表示 Cache 已被丢弃
                    if let Some(ack) = req {
                        let _ = ack.send(());
                    }
                    debug!("dns cache janitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = sweep(store.as_ref());
                    debug!(removed = removed, remaining = store.len(), "dns cache cleanup");
                }
            }
        }
    })
}

fn sweep(store: &dyn Store) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    let result = store.iter(&mut |key, record| {
        if record.is_expired(now) {
            match store.del(key) {
                Ok(()) => removed += 1,
                // 删除失败只记录，继续清理其他条目
                Err(e) => debug!(key = key, error = %e, "dns cache cleanup delete failed"),
            }
        }
        Ok(())
    });
    if let Err(e) = result {
        debug!(error = %e, "dns cache cleanup aborted");
    }
    removed
}
