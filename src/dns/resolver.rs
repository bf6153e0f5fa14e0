use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::common::addr::{check_domain, is_valid_ipv4, is_valid_ipv6, split_host_port, AddrError};
use crate::common::ResolveError;
use crate::config::{ServerConfig, Settings};

use super::cache::Cache;
use super::mdns::{MdnsBrowser, MulticastBrowser, DEFAULT_BROWSE_WINDOW};
use super::record::deadline_after;
use super::store::MemStore;
use super::transport::{fqdn, reverse_addr_name, DnsTransport, Question, RecordKind, Response, UdpTransport};
use super::DnsResolver;

const LOCALHOST: &str = "localhost";
const LOOPBACK_V4: &str = "127.0.0.1";
const LOOPBACK_V6: &str = "::1";

/// 缓存 → 字面量 → 单播 DNS → mDNS 的解析管线
///
/// 所有状态都挂在实例上，同一进程里可以有多个配置不同的 Resolver。
pub struct Resolver {
    cache: Arc<Cache>,
    config: ServerConfig,
    transport: Arc<dyn DnsTransport>,
    browser: Arc<dyn MulticastBrowser>,
    mdns_window: Duration,
}

impl Resolver {
    pub fn new(
        cache: Arc<Cache>,
        config: ServerConfig,
        transport: Arc<dyn DnsTransport>,
        browser: Arc<dyn MulticastBrowser>,
    ) -> Self {
        Self {
            cache,
            config,
            transport,
            browser,
            mdns_window: DEFAULT_BROWSE_WINDOW,
        }
    }

    pub fn with_mdns_window(mut self, window: Duration) -> Self {
        self.mdns_window = window;
        self
    }

    /// 按设置构建：读取解析器文件、内存缓存、UDP 客户端与 mDNS 浏览器。
    /// 必须在 tokio 运行时内调用。
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let config = ServerConfig::load_or_default(&settings.resolv_conf, settings.timeout_secs);
        let cache = Arc::new(Cache::new(
            Arc::new(MemStore::new()),
            settings.cache_ttl(),
            settings.cleanup_interval(),
        ));
        let browser = if settings.mdns_interfaces.is_empty() {
            MdnsBrowser::new()
        } else {
            MdnsBrowser::with_interfaces(settings.mdns_interfaces.clone())?
        };
        info!(
            servers = ?config.servers,
            ttl_secs = settings.cache_ttl_secs,
            mdns_secs = settings.mdns_timeout_secs,
            mdns_ifaces = ?browser.interfaces(),
            "resolver created"
        );
        Ok(Self::new(
            cache,
            config,
            Arc::new(UdpTransport::new(settings.client_timeouts())),
            Arc::new(browser),
        )
        .with_mdns_window(settings.mdns_window()))
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 停止缓存的后台清理任务
    pub async fn close(&self) {
        self.cache.close().await;
    }

    /// 名称 → 地址，优先使用缓存
    pub async fn lookup_host(&self, host: &str) -> Result<Vec<String>, ResolveError> {
        let start = Instant::now();
        let result = self.lookup(host, true, &self.config).await;
        debug!(host = host, elapsed_ms = start.elapsed().as_millis() as u64, "LookupHost");
        result
    }

    /// 跳过缓存读取；结果仍会写回缓存
    pub async fn lookup_host_no_cache(&self, host: &str) -> Result<Vec<String>, ResolveError> {
        let start = Instant::now();
        let result = self.lookup(host, false, &self.config).await;
        debug!(host = host, elapsed_ms = start.elapsed().as_millis() as u64, "LookupHostNoCache");
        result
    }

    /// 使用一次性的服务器列表查询，不影响默认配置
    pub async fn lookup_host_with_servers(
        &self,
        host: &str,
        servers: Vec<String>,
        attempts: u32,
        timeout: u64,
    ) -> Result<Vec<String>, ResolveError> {
        let start = Instant::now();
        let config = self.config.with_servers(servers, attempts, timeout);
        let result = self.lookup(host, true, &config).await;
        debug!(
            host = host,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "LookupHostWithServers"
        );
        result
    }

    /// 地址 → 名称（PTR），没有 mDNS 兜底
    pub async fn lookup_ip(&self, ip: &str) -> Result<String, ResolveError> {
        let start = Instant::now();
        let result = self.reverse(ip).await;
        debug!(ip = ip, elapsed_ms = start.elapsed().as_millis() as u64, "LookupIp");
        result
    }

    /// 把 "host" 或 "host:port" 解析成一个可显示的地址，IPv6 带方括号
    pub async fn resolve(&self, host_port: &str) -> Result<String, ResolveError> {
        let start = Instant::now();
        let result = self.resolve_one(host_port).await;
        debug!(
            host = host_port,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Resolve"
        );
        result
    }

    async fn resolve_one(&self, host_port: &str) -> Result<String, ResolveError> {
        let (host, port) = match split_host_port(host_port) {
            Ok((host, port)) => (host, Some(port)),
            Err(AddrError::MissingPort { host }) => (host, None),
            Err(e) => return Err(e.into()),
        };

        let addrs = self.lookup_host(&host).await?;
        let first = addrs
            .first()
            .ok_or_else(|| ResolveError::Unresolved(host.clone()))?;

        let mut out = if first.contains(':') {
            format!("[{}]", first)
        } else {
            first.clone()
        };
        if let Some(port) = port {
            out.push(':');
            out.push_str(&port);
        }
        Ok(out)
    }

    async fn lookup(
        &self,
        host: &str,
        use_cache: bool,
        config: &ServerConfig,
    ) -> Result<Vec<String>, ResolveError> {
        if host == LOCALHOST {
            return Ok(vec![LOOPBACK_V4.to_string(), LOOPBACK_V6.to_string()]);
        }
        if is_valid_ipv4(host) || is_valid_ipv6(host) {
            return Ok(vec![host.to_string()]);
        }
        check_domain(host)?;
        // "example.com." 与 "example.com" 共用一个缓存键；反向条目的键总以 `.` 结尾
        let host = host.strip_suffix('.').unwrap_or(host);

        let mut cached_failure = false;
        if use_cache {
            if let Some(record) = self.cache.get(host) {
                if let Ok(addrs) = record.return_addrs() {
                    debug!(host = host, "DNS cache hit");
                    return Ok(addrs.to_vec());
                }
                cached_failure = true;
            }
        }

        let unicast = if cached_failure {
            // 负缓存：TTL 内不再打扰上游服务器
            Err(ResolveError::ServerFailure(format!("cached failure for {}", host)))
        } else {
            self.query_unicast(host, config).await
        };

        match unicast {
            Ok(addrs) => return Ok(addrs),
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) if cached_failure && !is_multicast_name(host) => return Err(e),
            Err(e) => debug!(host = host, error = %e, "unicast lookup failed, trying mDNS"),
        }

        self.query_multicast(host).await
    }

    /// A 与 AAAA 分别查询，结果按 A 在前拼接；部分成功不算错误
    async fn query_unicast(
        &self,
        host: &str,
        config: &ServerConfig,
    ) -> Result<Vec<String>, ResolveError> {
        let mut addrs = Vec::new();
        for kind in [RecordKind::A, RecordKind::Aaaa] {
            let question = Question::new(host, kind);
            match self.exchange_with_failover(&question, config).await {
                Ok(response) if response.is_success() => addrs.extend(response.addrs(kind)),
                Ok(response) => {
                    debug!(host = host, kind = ?kind, rcode = ?response.rcode, "DNS query refused")
                }
                Err(e) => debug!(host = host, kind = ?kind, error = %e, "DNS query failed"),
            }
        }

        self.remember(host, &addrs);
        if addrs.is_empty() {
            return Err(ResolveError::Unresolved(format!("can't resolve {}", host)));
        }
        Ok(addrs)
    }

    /// 依次尝试每台服务器，第一个成功的应答胜出；传输错误记录后换下一台
    async fn exchange_with_failover(
        &self,
        question: &Question,
        config: &ServerConfig,
    ) -> Result<Response, ResolveError> {
        if config.servers.is_empty() {
            return Err(ResolveError::Unresolved("no DNS servers configured".to_string()));
        }

        let limit = config.exchange_timeout();
        let mut last_err = None;
        for attempt in 1..=config.attempts.max(1) {
            for server in &config.servers {
                let addr = config.server_addr(server);
                let err = match tokio::time::timeout(limit, self.transport.exchange(question, &addr)).await
                {
                    Ok(Ok(response)) => return Ok(response),
                    Ok(Err(e)) => e,
                    Err(_) => ResolveError::Transport(format!("{}: exchange timeout", addr)),
                };
                debug!(
                    server = %addr,
                    name = %question.name,
                    kind = ?question.kind,
                    attempt = attempt,
                    error = %err,
                    "DNS exchange failed"
                );
                last_err = Some(err);
            }
        }
        Err(last_err
            .unwrap_or_else(|| ResolveError::Unresolved(format!("no answer for {}", question.name))))
    }

    async fn query_multicast(&self, host: &str) -> Result<Vec<String>, ResolveError> {
        let start = Instant::now();
        let query = host.strip_suffix(".local").unwrap_or(host);

        let addrs = match self.browser.browse(query, "local.", self.mdns_window).await {
            Ok(mut entries) => {
                let deadline = deadline_after(start, self.mdns_window);
                let mut addrs = Vec::new();
                // 窗口结束时已收集到的就是答案
                while let Ok(Some(entry)) = tokio::time::timeout_at(deadline, entries.recv()).await {
                    addrs.extend(entry.addr_v4.iter().map(|ip| ip.to_string()));
                    addrs.extend(entry.addr_v6.iter().map(|ip| ip.to_string()));
                }
                Ok(addrs)
            }
            Err(e) => Err(e),
        };

        debug!(host = host, elapsed_ms = start.elapsed().as_millis() as u64, "mDNS lookup");
        let addrs = match addrs {
            Ok(addrs) => addrs,
            Err(e) => {
                self.remember(host, &[]);
                return Err(ResolveError::Unresolved(format!(
                    "failed to browse for {}: {}",
                    host, e
                )));
            }
        };

        self.remember(host, &addrs);
        if addrs.is_empty() {
            return Err(ResolveError::Unresolved(format!("can't resolve {}", host)));
        }
        Ok(addrs)
    }

    async fn reverse(&self, ip: &str) -> Result<String, ResolveError> {
        if ip == LOOPBACK_V4 || ip == LOOPBACK_V6 {
            return Ok(LOCALHOST.to_string());
        }

        if !is_valid_ipv4(ip) && !is_valid_ipv6(ip) {
            return Err(ResolveError::InvalidInput(format!(
                "not a valid ip address: {}",
                ip
            )));
        }

        // 以 in-addr.arpa / ip6.arpa 名称为键，与正向条目互不相干
        let key = fqdn(&reverse_addr_name(ip)?);
        if let Some(record) = self.cache.get(&key) {
            return record.return_ptr().map(str::to_string);
        }

        let question = Question::new(&key, RecordKind::Ptr);
        let outcome = match self.exchange_with_failover(&question, &self.config).await {
            Ok(response) if response.is_success() => response
                .first_ptr()
                .ok_or_else(|| ResolveError::Unresolved(format!("no ptr available for {}", ip))),
            Ok(response) => Err(ResolveError::Unresolved(format!(
                "can't resolve {}: {:?}",
                ip, response.rcode
            ))),
            Err(e) => Err(ResolveError::Unresolved(format!("can't resolve {}: {}", ip, e))),
        };

        let written = match &outcome {
            Ok(name) => self.cache.put_ptr(&key, name),
            Err(_) => self.cache.put_serv_fail(&key),
        };
        if let Err(e) = written {
            debug!(key = %key, error = %e, "DNS cache write-back failed");
        }
        outcome
    }

    /// 空结果写负缓存，否则写正缓存；写入失败只记录
    fn remember(&self, key: &str, addrs: &[String]) {
        let written = if addrs.is_empty() {
            self.cache.put_serv_fail(key)
        } else {
            self.cache.put_addrs(key, addrs.to_vec())
        };
        if let Err(e) = written {
            debug!(key = key, error = %e, "DNS cache write-back failed");
        }
    }
}

/// 只有 `.local` 名称在负缓存期间仍会尝试 mDNS
fn is_multicast_name(host: &str) -> bool {
    host.trim_end_matches('.').ends_with(".local")
}

#[async_trait]
impl DnsResolver for Resolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = self.lookup_host(host).await?;
        let ips: Vec<IpAddr> = addrs.iter().filter_map(|a| a.parse().ok()).collect();
        if ips.is_empty() {
            anyhow::bail!("DNS resolution failed: no addresses for {}", host);
        }
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_names() {
        assert!(is_multicast_name("printer.local"));
        assert!(is_multicast_name("printer.local."));
        assert!(!is_multicast_name("local"));
        assert!(!is_multicast_name("example.com"));
    }
}
