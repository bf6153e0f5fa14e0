use std::time::Duration;

use tokio::time::Instant;

use crate::common::ResolveError;

/// 溢出时使用的远期截止时间（约 30 年）
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`，溢出时退回远期截止时间
pub fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// 一次解析结果的缓存记录
///
/// `serv_fail` 为真时 `addrs` 只是占位（`[""]`），访问器会直接返回
/// `ServerFailure`，绝不把占位值当作答案交出去。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub addrs: Vec<String>,
    pub serv_fail: bool,
    pub expires_at: Instant,
}

impl HostRecord {
    pub fn with_addrs(addrs: Vec<String>, expires_at: Instant) -> Self {
        Self {
            addrs,
            serv_fail: false,
            expires_at,
        }
    }

    pub fn with_ptr(name: impl Into<String>, expires_at: Instant) -> Self {
        Self::with_addrs(vec![name.into()], expires_at)
    }

    pub fn serv_fail(expires_at: Instant) -> Self {
        Self {
            addrs: vec![String::new()],
            serv_fail: true,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn return_addrs(&self) -> Result<&[String], ResolveError> {
        if self.serv_fail {
            return Err(ResolveError::ServerFailure("cached failure".to_string()));
        }
        Ok(&self.addrs)
    }

    pub fn return_ptr(&self) -> Result<&str, ResolveError> {
        if self.serv_fail {
            return Err(ResolveError::ServerFailure("cached failure".to_string()));
        }
        self.addrs
            .first()
            .map(String::as_str)
            .ok_or_else(|| ResolveError::ServerFailure("empty ptr record".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResolveErrorKind;

    #[test]
    fn serv_fail_never_surfaces_placeholder() {
        let record = HostRecord::serv_fail(Instant::now());
        assert_eq!(
            record.return_addrs().unwrap_err().kind(),
            ResolveErrorKind::ServerFailure
        );
        assert_eq!(
            record.return_ptr().unwrap_err().kind(),
            ResolveErrorKind::ServerFailure
        );
    }

    #[test]
    fn ptr_returns_first_name() {
        let record = HostRecord::with_ptr("host.example.com", Instant::now());
        assert_eq!(record.return_ptr().unwrap(), "host.example.com");
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Instant::now();
        let record = HostRecord::with_addrs(vec!["10.0.0.1".into()], now);
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - Duration::from_millis(1)));
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));

        let far = deadline_after(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(86400 * 365));
    }
}
