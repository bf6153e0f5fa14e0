pub mod addr;
pub mod error;

pub use addr::AddrError;
pub use error::{ResolveError, ResolveErrorKind};
