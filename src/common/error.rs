use thiserror::Error;

use super::addr::AddrError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("server failure: {0}")]
    ServerFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("host name not resolved: {0}")]
    Unresolved(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ResolveError {
    /// Whether a lower resolution layer may still answer after this error.
    ///
    /// Only malformed input is final; everything else means "this layer
    /// could not produce an answer".
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ResolveError::InvalidInput(_))
    }

    /// Try to extract a ResolveError from an anyhow::Error.
    pub fn classify(err: &anyhow::Error) -> Option<ResolveErrorKind> {
        err.downcast_ref::<ResolveError>().map(ResolveError::kind)
    }

    pub fn kind(&self) -> ResolveErrorKind {
        match self {
            ResolveError::ServerFailure(_) => ResolveErrorKind::ServerFailure,
            ResolveError::InvalidInput(_) => ResolveErrorKind::InvalidInput,
            ResolveError::Unresolved(_) => ResolveErrorKind::Unresolved,
            ResolveError::Transport(_) => ResolveErrorKind::Transport,
        }
    }
}

impl From<AddrError> for ResolveError {
    fn from(e: AddrError) -> Self {
        ResolveError::InvalidInput(e.to_string())
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(e: std::io::Error) -> Self {
        ResolveError::Transport(e.to_string())
    }
}

/// Lightweight error category for pattern matching without borrowing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    ServerFailure,
    InvalidInput,
    Unresolved,
    Transport,
}

impl ResolveErrorKind {
    /// CLI 错误输出中使用的短标签
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveErrorKind::ServerFailure => "SERVFAIL",
            ResolveErrorKind::InvalidInput => "INVALID_INPUT",
            ResolveErrorKind::Unresolved => "UNRESOLVED",
            ResolveErrorKind::Transport => "TRANSPORT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_not_recoverable() {
        assert!(!ResolveError::InvalidInput("x".into()).is_recoverable());
        assert!(ResolveError::Unresolved("x".into()).is_recoverable());
        assert!(ResolveError::ServerFailure("x".into()).is_recoverable());
        assert!(ResolveError::Transport("x".into()).is_recoverable());
    }

    #[test]
    fn classify_through_anyhow() {
        let err: anyhow::Error = ResolveError::Unresolved("example.com".into()).into();
        assert_eq!(
            ResolveError::classify(&err),
            Some(ResolveErrorKind::Unresolved)
        );
        assert_eq!(ResolveError::classify(&anyhow::anyhow!("other")), None);
    }

    #[test]
    fn addr_error_maps_to_invalid_input() {
        let err: ResolveError = AddrError::Empty.into();
        assert_eq!(err.kind(), ResolveErrorKind::InvalidInput);
        assert_eq!(err.kind().as_str(), "INVALID_INPUT");
    }
}
