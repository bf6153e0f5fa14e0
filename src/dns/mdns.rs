//! 组播 DNS（mDNS）浏览，作为单播解析失败后的局域网兜底。
//!
//! 采用 RFC 6762 §5.1 的一次性查询：从临时端口向 224.0.0.251:5353 发送
//! A/AAAA 问题，响应者以单播回复到源端口，因此无需加入组播组。
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::proto::op::Message;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::record::deadline_after;
use super::transport::{build_query, convert_answers, fqdn, Answer, Question, RecordKind};
use crate::common::ResolveError;

/// mDNS 组播地址
pub const MDNS_GROUP: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353));

/// 默认浏览窗口
pub const DEFAULT_BROWSE_WINDOW: Duration = Duration::from_secs(5);

/// 一次浏览发现的一个条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub addr_v4: Vec<Ipv4Addr>,
    pub addr_v6: Vec<Ipv6Addr>,
}

impl ServiceEntry {
    pub fn is_empty(&self) -> bool {
        self.addr_v4.is_empty() && self.addr_v6.is_empty()
    }
}

/// 组播浏览接口
///
/// 在 `window` 内把发现的条目推入返回的通道；窗口结束后发送端被丢弃。
#[async_trait]
pub trait MulticastBrowser: Send + Sync {
    async fn browse(
        &self,
        query: &str,
        domain: &str,
        window: Duration,
    ) -> Result<mpsc::Receiver<ServiceEntry>, ResolveError>;
}

/// 基于 UDP 组播的 mDNS 浏览器
pub struct MdnsBrowser {
    /// 发送查询所用的本地接口地址，空表示系统默认接口
    interfaces: Vec<Ipv4Addr>,
}

impl MdnsBrowser {
    pub fn new() -> Self {
        Self {
            interfaces: Vec::new(),
        }
    }

    /// 只在指定接口上发送查询
    pub fn with_interfaces(interfaces: Vec<Ipv4Addr>) -> Result<Self, ResolveError> {
        if interfaces.is_empty() {
            return Err(ResolveError::InvalidInput("invalid interfaces".to_string()));
        }
        Ok(Self { interfaces })
    }

    pub fn interfaces(&self) -> &[Ipv4Addr] {
        &self.interfaces
    }

    fn open_socket(iface: Option<Ipv4Addr>) -> std::io::Result<UdpSocket> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_multicast_ttl_v4(255)?;
        socket.set_multicast_loop_v4(true)?;
        if let Some(iface) = iface {
            socket.set_multicast_if_v4(&iface)?;
        }
        let bind = SocketAddr::new(iface.unwrap_or(Ipv4Addr::UNSPECIFIED).into(), 0);
        socket.bind(&bind.into())?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket.into())
    }
}

impl Default for MdnsBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MulticastBrowser for MdnsBrowser {
    async fn browse(
        &self,
        query: &str,
        domain: &str,
        window: Duration,
    ) -> Result<mpsc::Receiver<ServiceEntry>, ResolveError> {
        let name = fqdn(&format!(
            "{}.{}",
            query.trim_end_matches('.'),
            domain.trim_end_matches('.')
        ));
        let questions = [
            Question::new(&name, RecordKind::A),
            Question::new(&name, RecordKind::Aaaa),
        ];
        let mut msg = build_query(&questions, rand::random())?;
        msg.set_recursion_desired(false);
        let bytes = msg
            .to_vec()
            .map_err(|e| ResolveError::Transport(format!("encode mdns query: {}", e)))?;

        let ifaces: Vec<Option<Ipv4Addr>> = if self.interfaces.is_empty() {
            vec![None]
        } else {
            self.interfaces.iter().copied().map(Some).collect()
        };

        let deadline = deadline_after(Instant::now(), window);
        let (tx, rx) = mpsc::channel(16);
        let mut sent = 0;
        for iface in ifaces {
            let socket = match Self::open_socket(iface) {
                Ok(s) => s,
                Err(e) => {
                    debug!(iface = ?iface, error = %e, "mdns socket open failed");
                    continue;
                }
            };
            if let Err(e) = socket.send_to(&bytes, MDNS_GROUP).await {
                debug!(iface = ?iface, error = %e, "mdns query send failed");
                continue;
            }
            sent += 1;
            tokio::spawn(collect_replies(socket, name.clone(), deadline, tx.clone()));
        }

        if sent == 0 {
            return Err(ResolveError::Transport(
                "failed to browse: no usable interface".to_string(),
            ));
        }
        Ok(rx)
    }
}

async fn collect_replies(
    socket: UdpSocket,
    name: String,
    deadline: Instant,
    tx: mpsc::Sender<ServiceEntry>,
) {
    let mut buf = vec![0u8; 9000];
    loop {
        let (n, peer) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                debug!(error = %e, "mdns receive failed");
                return;
            }
            Err(_) => return,
        };
        let reply = match Message::from_vec(&buf[..n]) {
            Ok(m) => m,
            Err(e) => {
                debug!(peer = %peer, error = %e, "mdns reply decode failed");
                continue;
            }
        };

        let records = reply
            .answers()
            .iter()
            .chain(reply.additionals().iter())
            .filter(|r| r.name().to_string().eq_ignore_ascii_case(&name));
        let entry = entry_from_answers(convert_answers(records));
        if entry.is_empty() {
            continue;
        }
        debug!(peer = %peer, entry = ?entry, "mDNS entry");
        if tx.send(entry).await.is_err() {
            return;
        }
    }
}

fn entry_from_answers(answers: Vec<Answer>) -> ServiceEntry {
    let mut entry = ServiceEntry::default();
    for answer in answers {
        match answer {
            Answer::A(ip) => entry.addr_v4.push(ip),
            Answer::Aaaa(ip) => entry.addr_v6.push(ip),
            Answer::Ptr(_) => {}
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_interface_list_is_rejected() {
        assert!(matches!(
            MdnsBrowser::with_interfaces(vec![]),
            Err(ResolveError::InvalidInput(_))
        ));
        let browser = MdnsBrowser::with_interfaces(vec![Ipv4Addr::LOCALHOST]).unwrap();
        assert_eq!(browser.interfaces(), &[Ipv4Addr::LOCALHOST]);
    }

    #[test]
    fn entry_splits_families() {
        let entry = entry_from_answers(vec![
            Answer::A(Ipv4Addr::new(192, 168, 1, 20)),
            Answer::Ptr("ignored.local.".into()),
            Answer::Aaaa(Ipv6Addr::LOCALHOST),
        ]);
        assert_eq!(entry.addr_v4, vec![Ipv4Addr::new(192, 168, 1, 20)]);
        assert_eq!(entry.addr_v6, vec![Ipv6Addr::LOCALHOST]);
        assert!(!entry.is_empty());
        assert!(ServiceEntry::default().is_empty());
    }

    #[tokio::test]
    async fn browse_window_closes_channel() {
        let browser = MdnsBrowser::new();
        // 沙箱里可能没有组播路由，两种结果都可以接受
        if let Ok(mut rx) = browser
            .browse("no-such-host-hostres-test", "local.", Duration::from_millis(100))
            .await
        {
            let drained = tokio::time::timeout(Duration::from_secs(2), async {
                while rx.recv().await.is_some() {}
            })
            .await;
            assert!(drained.is_ok());
        }
    }
}
