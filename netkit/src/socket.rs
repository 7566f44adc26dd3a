use std::{mem, net::SocketAddr, os::fd::RawFd};

use crate::{
  addr,
  error::{Error, Result},
};

/// Address family requested from the resolver and for raw socket creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
  Ipv4,
  Ipv6,
  /// Let the resolver pick; candidates of both families may come back.
  Unspecified,
}

impl AddressFamily {
  pub(crate) fn as_raw(self) -> libc::c_int {
    match self {
      Self::Ipv4 => libc::AF_INET,
      Self::Ipv6 => libc::AF_INET6,
      Self::Unspecified => libc::AF_UNSPEC,
    }
  }
}

/// Transport protocol, expressed as the socket type it maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressProtocol {
  Tcp,
  Udp,
}

impl AddressProtocol {
  pub(crate) fn socktype(self) -> libc::c_int {
    match self {
      Self::Tcp => libc::SOCK_STREAM,
      Self::Udp => libc::SOCK_DGRAM,
    }
  }
}

/// Exclusive owner of at most one socket descriptor.
///
/// The descriptor is closed exactly once: either by an explicit
/// [`close`](Socket::close) or when the handle drops. A handle that
/// currently owns nothing reports [`Error::NotConnected`] from
/// [`raw`](Socket::raw) instead of handing out a stale descriptor.
#[derive(Debug, Default)]
pub struct Socket {
  fd: Option<RawFd>,
}

impl Socket {
  /// An empty handle that owns no descriptor yet.
  pub const fn new() -> Self {
    Self { fd: None }
  }

  /// Opens a fresh socket for the given family and protocol.
  pub fn create(family: AddressFamily, protocol: AddressProtocol) -> Result<Self> {
    Self::create_raw(family.as_raw(), protocol.socktype(), 0)
  }

  /// Opens a socket from the raw integers a resolver candidate carries.
  pub(crate) fn create_raw(
    family: libc::c_int,
    socktype: libc::c_int,
    protocol: libc::c_int,
  ) -> Result<Self> {
    // SAFETY: plain syscall, no pointers involved.
    let fd = unsafe { libc::socket(family, socktype, protocol) };
    if fd < 0 {
      return Err(Error::last_os_error());
    }
    Ok(Self { fd: Some(fd) })
  }

  /// Wraps an already-open descriptor, e.g. one returned by `accept`.
  pub(crate) fn from_raw(fd: RawFd) -> Self {
    Self { fd: Some(fd) }
  }

  pub fn is_valid(&self) -> bool {
    matches!(self.fd, Some(fd) if fd >= 0)
  }

  /// The owned descriptor, or `NotConnected` when there is none.
  pub fn raw(&self) -> Result<RawFd> {
    self.fd.ok_or(Error::NotConnected)
  }

  /// Closes the descriptor if one is owned. Idempotent.
  pub fn close(&mut self) {
    if let Some(fd) = self.fd.take() {
      // SAFETY: fd was exclusively owned by this handle.
      unsafe { libc::close(fd) };
    }
  }

  pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
    let fd = self.raw()?;
    // SAFETY: valid descriptor, no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
      return Err(Error::last_os_error());
    }
    let flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    // SAFETY: same as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } != 0 {
      return Err(Error::last_os_error());
    }
    Ok(())
  }

  pub fn set_reuseaddr(&self, reuse: bool) -> Result<()> {
    self.set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, reuse as libc::c_int)
  }

  pub fn set_no_delay(&self, no_delay: bool) -> Result<()> {
    self.set_option(libc::IPPROTO_TCP, libc::TCP_NODELAY, no_delay as libc::c_int)
  }

  pub fn set_recv_buffer_size(&self, bytes: usize) -> Result<()> {
    self.set_option(libc::SOL_SOCKET, libc::SO_RCVBUF, bytes as libc::c_int)
  }

  pub fn set_send_buffer_size(&self, bytes: usize) -> Result<()> {
    self.set_option(libc::SOL_SOCKET, libc::SO_SNDBUF, bytes as libc::c_int)
  }

  pub fn recv_buffer_size(&self) -> Result<usize> {
    self.option(libc::SOL_SOCKET, libc::SO_RCVBUF).map(|v| v as usize)
  }

  pub fn send_buffer_size(&self) -> Result<usize> {
    self.option(libc::SOL_SOCKET, libc::SO_SNDBUF).map(|v| v as usize)
  }

  /// Pending asynchronous error, as a non-blocking connect leaves behind.
  pub fn take_error(&self) -> Result<Option<Error>> {
    let err = self.option(libc::SOL_SOCKET, libc::SO_ERROR)?;
    if err == 0 { Ok(None) } else { Ok(Some(Error::from_errno(err))) }
  }

  /// The locally bound address, useful after binding to port 0.
  pub fn local_addr(&self) -> Result<SocketAddr> {
    let fd = self.raw()?;
    // SAFETY: zeroed storage is a valid out-parameter for getsockname.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: storage and len stay alive across the call and match.
    let rc = unsafe {
      libc::getsockname(fd, (&raw mut storage).cast::<libc::sockaddr>(), &mut len)
    };
    if rc != 0 {
      return Err(Error::last_os_error());
    }
    addr::to_socket_addr(&storage)
  }

  fn set_option(&self, level: libc::c_int, option: libc::c_int, value: libc::c_int) -> Result<()> {
    let fd = self.raw()?;
    // SAFETY: value lives across the call and the length matches it.
    let rc = unsafe {
      libc::setsockopt(
        fd,
        level,
        option,
        (&raw const value).cast::<libc::c_void>(),
        mem::size_of::<libc::c_int>() as libc::socklen_t,
      )
    };
    if rc != 0 { Err(Error::last_os_error()) } else { Ok(()) }
  }

  fn option(&self, level: libc::c_int, option: libc::c_int) -> Result<libc::c_int> {
    let fd = self.raw()?;
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value and len stay alive across the call and match.
    let rc = unsafe {
      libc::getsockopt(fd, level, option, (&raw mut value).cast::<libc::c_void>(), &mut len)
    };
    if rc != 0 { Err(Error::last_os_error()) } else { Ok(value) }
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    self.close();
  }
}

/// Two handles are equal when they own the same descriptor; two empty
/// handles are equal to each other.
impl PartialEq for Socket {
  fn eq(&self, other: &Self) -> bool {
    self.fd == other.fd
  }
}

impl Eq for Socket {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_handle_owns_nothing() {
    let sock = Socket::new();
    assert!(!sock.is_valid());
    assert_eq!(sock.raw(), Err(Error::NotConnected));
  }

  #[test]
  fn create_then_close_is_idempotent() {
    let mut sock = Socket::create(AddressFamily::Ipv4, AddressProtocol::Tcp).unwrap();
    assert!(sock.is_valid());
    sock.close();
    assert!(!sock.is_valid());
    sock.close();
    assert_eq!(sock.raw(), Err(Error::NotConnected));
  }

  #[test]
  fn equality_follows_the_descriptor() {
    let a = Socket::create(AddressFamily::Ipv4, AddressProtocol::Tcp).unwrap();
    let b = Socket::create(AddressFamily::Ipv4, AddressProtocol::Tcp).unwrap();
    assert_ne!(a, b);
    assert_eq!(a, a);
    assert_eq!(Socket::new(), Socket::new());
    assert_ne!(a, Socket::new());
  }

  #[test]
  fn options_are_settable() {
    let sock = Socket::create(AddressFamily::Ipv4, AddressProtocol::Tcp).unwrap();
    sock.set_reuseaddr(true).unwrap();
    sock.set_no_delay(true).unwrap();
    sock.set_recv_buffer_size(65536).unwrap();
    // The kernel may round the value up; it must not shrink it.
    assert!(sock.recv_buffer_size().unwrap() >= 65536);
  }

  #[test]
  fn no_pending_error_on_a_fresh_socket() {
    let sock = Socket::create(AddressFamily::Ipv4, AddressProtocol::Tcp).unwrap();
    assert_eq!(sock.take_error().unwrap(), None);
  }
}
