pub mod cache;
pub mod mdns;
pub mod record;
pub mod resolver;
pub mod store;
pub mod transport;

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

pub use cache::Cache;
pub use mdns::{MdnsBrowser, MulticastBrowser, ServiceEntry};
pub use record::HostRecord;
pub use resolver::Resolver;
pub use store::{MemStore, Store, StoreError};
pub use transport::{DnsTransport, UdpTransport};

/// DNS 解析器 trait
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// 将域名解析为 IP 地址列表
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}
