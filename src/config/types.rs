use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::common::addr::ip_port;

pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// 缓存 TTL 与清理间隔的上限：一年
pub const MAX_CACHE_SECS: u64 = 365 * 24 * 60 * 60;
/// 单次交换与 mDNS 窗口的上限
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// 单播 DNS 服务器配置
///
/// 构造后不可变；单次查询可以传入另一份配置覆盖默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub servers: Vec<String>,
    pub port: String,
    /// 服务器列表的最大轮询次数
    pub attempts: u32,
    pub ndots: u32,
    /// 单次交换的超时（秒）
    pub timeout: u64,
}

impl Default for ServerConfig {
    /// 读取解析器文件失败时使用的硬编码配置
    fn default() -> Self {
        Self {
            servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            port: "53".to_string(),
            attempts: 3,
            ndots: 1,
            timeout: default_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// 派生一份只替换服务器、重试次数与超时的配置，端口和 ndots 沿用当前值
    pub fn with_servers(&self, servers: Vec<String>, attempts: u32, timeout: u64) -> Self {
        Self {
            servers,
            port: self.port.clone(),
            attempts,
            ndots: self.ndots,
            timeout,
        }
    }

    /// 单次交换（含拨号、写、读）的总上限，比 `ClientTimeouts` 的单步超时优先
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// 服务器的可拨号地址 "ip:port"，IPv6 带方括号；无法识别的条目原样拼接
    pub fn server_addr(&self, server: &str) -> String {
        ip_port(server, &self.port).unwrap_or_else(|_| format!("{}:{}", server, self.port))
    }
}

/// 单播客户端的拨号 / 读 / 写超时
///
/// 每一步都在 `ServerConfig::exchange_timeout` 的总上限之内运行，超过总上限的单步值不会生效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub dial: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            dial: Duration::from_millis(default_dial_timeout_ms()),
            read: Duration::from_millis(default_io_timeout_ms()),
            write: Duration::from_millis(default_io_timeout_ms()),
        }
    }
}

/// 进程启动时读取一次的解析器设置
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub mdns_timeout_secs: u64,
    #[serde(default)]
    pub mdns_interfaces: Vec<Ipv4Addr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolv_conf: default_resolv_conf(),
            timeout_secs: default_timeout_secs(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            mdns_timeout_secs: default_timeout_secs(),
            mdns_interfaces: Vec::new(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("cache-ttl-secs must be greater than zero");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("cleanup-interval-secs must be greater than zero");
        }
        if self.mdns_timeout_secs == 0 {
            anyhow::bail!("mdns-timeout-secs must be greater than zero");
        }
        if self.dial_timeout_ms == 0 || self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            anyhow::bail!("client timeouts must be greater than zero");
        }
        if self.cache_ttl_secs > MAX_CACHE_SECS || self.cleanup_interval_secs > MAX_CACHE_SECS {
            anyhow::bail!(
                "cache-ttl-secs and cleanup-interval-secs must not exceed {}",
                MAX_CACHE_SECS
            );
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS || self.mdns_timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "timeout-secs and mdns-timeout-secs must not exceed {}",
                MAX_TIMEOUT_SECS
            );
        }
        Ok(())
    }

    /// 单步超时，各自截断到 `timeout-secs`
    pub fn client_timeouts(&self) -> ClientTimeouts {
        let limit = Duration::from_secs(self.timeout_secs.max(1));
        ClientTimeouts {
            dial: Duration::from_millis(self.dial_timeout_ms).min(limit),
            read: Duration::from_millis(self.read_timeout_ms).min(limit),
            write: Duration::from_millis(self.write_timeout_ms).min(limit),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn mdns_window(&self) -> Duration {
        Duration::from_secs(self.mdns_timeout_secs)
    }
}

fn default_resolv_conf() -> String {
    DEFAULT_RESOLV_CONF.to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_dial_timeout_ms() -> u64 {
    10_000
}

fn default_io_timeout_ms() -> u64 {
    500
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.servers, vec!["8.8.8.8", "8.8.4.4"]);
        assert_eq!(config.port, "53");
        assert_eq!(config.attempts, 3);
        assert_eq!(config.ndots, 1);
        assert_eq!(config.timeout, 5);
    }

    #[test]
    fn override_keeps_port_and_ndots() {
        let base = ServerConfig {
            port: "5353".to_string(),
            ndots: 2,
            ..ServerConfig::default()
        };
        let custom = base.with_servers(vec!["1.1.1.1".to_string()], 5, 30);
        assert_eq!(custom.servers, vec!["1.1.1.1"]);
        assert_eq!(custom.port, "5353");
        assert_eq!(custom.ndots, 2);
        assert_eq!(custom.attempts, 5);
        assert_eq!(custom.exchange_timeout(), Duration::from_secs(30));
        // 原配置不受影响
        assert_eq!(base.servers, vec!["8.8.8.8", "8.8.4.4"]);
    }

    #[test]
    fn server_addr_formats_families() {
        let config = ServerConfig::default();
        assert_eq!(config.server_addr("8.8.8.8"), "8.8.8.8:53");
        assert_eq!(config.server_addr("2001:4860:4860::8888"), "[2001:4860:4860::8888]:53");
    }

    #[test]
    fn settings_defaults_from_empty_yaml() {
        let settings: Settings = serde_yml::from_str("{}").unwrap();
        assert_eq!(settings.resolv_conf, "/etc/resolv.conf");
        assert_eq!(settings.cache_ttl(), Duration::from_secs(86400));
        assert_eq!(settings.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(settings.mdns_window(), Duration::from_secs(5));
        assert_eq!(settings.client_timeouts().read, Duration::from_millis(500));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_kebab_case_keys() {
        let yaml = r#"
resolv-conf: /tmp/resolv.conf
cache-ttl-secs: 60
mdns-interfaces:
  - 192.168.1.10
"#;
        let settings: Settings = serde_yml::from_str(yaml).unwrap();
        assert_eq!(settings.resolv_conf, "/tmp/resolv.conf");
        assert_eq!(settings.cache_ttl_secs, 60);
        assert_eq!(settings.mdns_interfaces, vec![Ipv4Addr::new(192, 168, 1, 10)]);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let settings = Settings {
            cache_ttl_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for settings in [
            Settings {
                cache_ttl_secs: u64::MAX,
                ..Settings::default()
            },
            Settings {
                cleanup_interval_secs: MAX_CACHE_SECS + 1,
                ..Settings::default()
            },
            Settings {
                mdns_timeout_secs: u64::MAX,
                ..Settings::default()
            },
            Settings {
                timeout_secs: MAX_TIMEOUT_SECS + 1,
                ..Settings::default()
            },
        ] {
            assert!(settings.validate().is_err());
        }
        let edge = Settings {
            cache_ttl_secs: MAX_CACHE_SECS,
            mdns_timeout_secs: MAX_TIMEOUT_SECS,
            ..Settings::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn step_timeouts_never_exceed_exchange_timeout() {
        let settings = Settings::default();
        let timeouts = settings.client_timeouts();
        // 默认拨号 10s 被截断到 5s 的总超时
        assert_eq!(timeouts.dial, Duration::from_secs(5));
        assert_eq!(timeouts.write, Duration::from_millis(500));

        let short = Settings {
            timeout_secs: 1,
            read_timeout_ms: 3000,
            ..Settings::default()
        };
        assert_eq!(short.client_timeouts().read, Duration::from_secs(1));
        assert_eq!(short.client_timeouts().dial, Duration::from_secs(1));
    }
}
