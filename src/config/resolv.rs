//! `resolv.conf` 解析
use std::net::IpAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::types::ServerConfig;

impl ServerConfig {
    /// 解析 resolv.conf 内容：`nameserver` 行和 `options ndots:N attempts:N timeout:N`
    pub fn parse_resolv_conf(content: &str) -> Result<Self> {
        let mut config = ServerConfig::default();
        let mut servers = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            match fields.next() {
                Some("nameserver") => {
                    let Some(raw) = fields.next() else {
                        continue;
                    };
                    let ip_str = raw.split('%').next().unwrap_or(raw);
                    let Ok(ip) = ip_str.parse::<IpAddr>() else {
                        continue;
                    };
                    // 链路本地地址离开 scope id 无法拨号
                    if is_link_local_v6(&ip) {
                        warn!(nameserver = raw, "skipping link-local nameserver");
                        continue;
                    }
                    let ip = ip.to_string();
                    if !servers.contains(&ip) {
                        servers.push(ip);
                    }
                }
                Some("options") => {
                    for option in fields {
                        let Some((key, value)) = option.split_once(':') else {
                            continue;
                        };
                        let Ok(n) = value.parse::<u32>() else {
                            continue;
                        };
                        match key {
                            "ndots" => config.ndots = n.min(15),
                            "attempts" => config.attempts = n.clamp(1, 5),
                            "timeout" => config.timeout = u64::from(n.clamp(1, 30)),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        if servers.is_empty() {
            bail!("no nameserver entries found");
        }
        config.servers = servers;
        Ok(config)
    }

    pub fn from_resolv_conf(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::parse_resolv_conf(&content).with_context(|| format!("parse {}", path.display()))
    }

    /// 读取解析器文件，失败时退回硬编码配置。无论来源，超时都使用 `timeout_secs`。
    pub fn load_or_default(path: impl AsRef<Path>, timeout_secs: u64) -> Self {
        let path = path.as_ref();
        let mut config = match Self::from_resolv_conf(path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    servers = ?config.servers,
                    "DNS server config loaded"
                );
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config failed, using fallback DNS servers");
                ServerConfig::default()
            }
        };
        config.timeout = timeout_secs;
        config
    }
}

/// fe80::/10
fn is_link_local_v6(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80)
}
