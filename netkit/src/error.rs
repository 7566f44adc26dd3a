use std::io;

/// Classified outcomes of socket, resolver and pool operations.
///
/// Errno values that have a meaning the toolkit reacts to get their own
/// variant; everything else is carried through as [`Error::Os`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  #[error("socket is not connected")]
  NotConnected,
  #[error("operation timed out")]
  TimedOut,
  #[error("connection aborted by peer")]
  ConnectionAborted,
  #[error("resource temporarily unavailable")]
  WouldBlock,
  #[error("connection attempt in progress")]
  InProgress,
  #[error("partial message transfer")]
  MessageSize,
  #[error("interrupted")]
  Interrupted,
  #[error("invalid argument")]
  InvalidArgument,
  #[error("address family not supported")]
  AddressFamilyNotSupported,
  #[error("network unreachable")]
  NetworkUnreachable,
  #[error("out of memory")]
  OutOfMemory,
  #[error("descriptor is not a socket")]
  NotASocket,
  #[error("operation not supported")]
  NotSupported,
  #[error("os error {0}")]
  Os(i32),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  /// Classifies a raw errno value.
  pub fn from_errno(errno: i32) -> Self {
    // EAGAIN and EWOULDBLOCK share a value on most targets, so they
    // cannot both appear as match patterns.
    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
      return Self::WouldBlock;
    }
    match errno {
      libc::EINPROGRESS => Self::InProgress,
      libc::ETIMEDOUT => Self::TimedOut,
      libc::ECONNABORTED | libc::ECONNRESET | libc::EPIPE => Self::ConnectionAborted,
      libc::EINTR => Self::Interrupted,
      libc::EINVAL => Self::InvalidArgument,
      libc::EAFNOSUPPORT => Self::AddressFamilyNotSupported,
      libc::ENETUNREACH | libc::EHOSTUNREACH => Self::NetworkUnreachable,
      libc::ENOMEM => Self::OutOfMemory,
      libc::ENOTCONN => Self::NotConnected,
      libc::ENOTSOCK => Self::NotASocket,
      libc::EMSGSIZE => Self::MessageSize,
      libc::EOPNOTSUPP => Self::NotSupported,
      other => Self::Os(other),
    }
  }

  /// Classifies the calling thread's current errno.
  pub(crate) fn last_os_error() -> Self {
    Self::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(0))
  }

  /// Whether retrying the same call later can succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::WouldBlock | Self::Interrupted | Self::InProgress)
  }
}
