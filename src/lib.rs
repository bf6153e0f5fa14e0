//! 带 TTL 缓存的主机名解析：单播 DNS、mDNS 兜底与负缓存。
#![allow(clippy::len_without_is_empty)]

pub mod common;
pub mod config;
pub mod dns;

pub use common::{ResolveError, ResolveErrorKind};
pub use dns::Resolver;
