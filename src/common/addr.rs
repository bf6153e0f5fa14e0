use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// 主机 / 端口字符串的语法错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("invalid host length")]
    Empty,

    #[error("can't find the host")]
    MissingHost,

    /// 输入里没有端口。调用方通常把它当作非致命情况，直接使用 `host`。
    #[error("can't find the port number")]
    MissingPort { host: String },

    #[error("invalid domain name or ipv4: {0}")]
    InvalidHost(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("invalid ip address: {0}")]
    InvalidIp(String),
}

pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

/// 接受带方括号的形式以及 `fe80::1%eth0` 这样的 zone 后缀
pub fn is_valid_ipv6(ip: &str) -> bool {
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    let ip = match ip.split_once('%') {
        Some((addr, zone)) if !zone.is_empty() => addr,
        Some(_) => return false,
        None => ip,
    };
    ip.parse::<Ipv6Addr>().is_ok()
}

/// 校验域名：每段 1..=63 字节，字母数字、`-`、`_`，不以 `-` 开头或结尾
pub fn check_domain(host: &str) -> Result<(), AddrError> {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.is_empty() || trimmed.len() > 253 {
        return Err(AddrError::InvalidHost(host.to_string()));
    }
    for label in trimmed.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(AddrError::InvalidHost(host.to_string()));
        }
    }
    Ok(())
}

/// 拆分 "host:port"、"[ipv6]:port"、裸 IPv6 或裸主机名。
///
/// 没有端口时返回 `AddrError::MissingPort`，其中携带已校验过的 host。
/// 返回的 host 统一为小写。
pub fn split_host_port(hp: &str) -> Result<(String, String), AddrError> {
    if hp.is_empty() {
        return Err(AddrError::Empty);
    }

    let (host, port) = if let Some(rest) = hp.strip_prefix('[') {
        // [2001:db8::1]:100
        let (inner, tail) = rest
            .split_once(']')
            .ok_or_else(|| AddrError::InvalidIp(hp.to_string()))?;
        if !is_valid_ipv6(inner) {
            return Err(AddrError::InvalidIp(hp.to_string()));
        }
        let port = match tail {
            "" => "",
            t => t
                .strip_prefix(':')
                .ok_or_else(|| AddrError::InvalidIp(hp.to_string()))?,
        };
        (inner, port)
    } else if is_valid_ipv6(hp) {
        // 裸 IPv6 字面量不可能带端口
        (hp, "")
    } else {
        let (host, port) = hp.split_once(':').unwrap_or((hp, ""));
        if !host.is_empty() && !is_valid_ipv4(host) {
            check_domain(host)?;
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(AddrError::MissingHost);
    }
    let host = host.to_lowercase();
    if port.is_empty() {
        return Err(AddrError::MissingPort { host });
    }
    if port.parse::<u16>().is_err() {
        return Err(AddrError::InvalidPort(port.to_string()));
    }
    Ok((host, port.to_string()))
}

/// 把 IP 和端口拼成可拨号的地址，IPv6 自动加方括号
pub fn ip_port(ip: &str, port: &str) -> Result<String, AddrError> {
    if is_valid_ipv4(ip) {
        Ok(format!("{}:{}", ip, port))
    } else if is_valid_ipv6(ip) {
        let bare = ip.trim_start_matches('[').trim_end_matches(']');
        Ok(format!("[{}]:{}", bare, port))
    } else {
        Err(AddrError::InvalidIp(ip.to_string()))
    }
}
