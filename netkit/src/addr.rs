use std::{
  mem,
  net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
  ptr,
};

use crate::error::{Error, Result};

/// Reads a kernel-filled `sockaddr_storage` back into a `SocketAddr`.
pub(crate) fn to_socket_addr(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
  if storage.ss_family == libc::AF_INET as libc::sa_family_t {
    // SAFETY: ss_family says this is a sockaddr_in, which fits inside
    // sockaddr_storage by design.
    let v4 = unsafe { *(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
    let ip = Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(v4.sin_port))))
  } else if storage.ss_family == libc::AF_INET6 as libc::sa_family_t {
    // SAFETY: same as above for sockaddr_in6.
    let v6 = unsafe { *(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>() };
    let ip = Ipv6Addr::from(v6.sin6_addr.s6_addr);
    Ok(SocketAddr::V6(SocketAddrV6::new(
      ip,
      u16::from_be(v6.sin6_port),
      v6.sin6_flowinfo,
      v6.sin6_scope_id,
    )))
  } else {
    Err(Error::AddressFamilyNotSupported)
  }
}

/// Lays a `SocketAddr` out as a `sockaddr_storage` plus the length the
/// kernel expects for its family.
pub(crate) fn to_storage(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
  // SAFETY: sockaddr_storage is all primitive fields, zero is valid.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let len = match addr {
    SocketAddr::V4(v4) => {
      let sin = into_addr(v4);
      // SAFETY: sockaddr_in fits inside sockaddr_storage and the two
      // stack locations cannot overlap.
      unsafe {
        ptr::copy_nonoverlapping(
          (&raw const sin).cast::<u8>(),
          (&raw mut storage).cast::<u8>(),
          mem::size_of::<libc::sockaddr_in>(),
        );
      }
      mem::size_of::<libc::sockaddr_in>()
    }
    SocketAddr::V6(v6) => {
      let sin6 = into_addr6(v6);
      // SAFETY: same as the V4 arm for sockaddr_in6.
      unsafe {
        ptr::copy_nonoverlapping(
          (&raw const sin6).cast::<u8>(),
          (&raw mut storage).cast::<u8>(),
          mem::size_of::<libc::sockaddr_in6>(),
        );
      }
      mem::size_of::<libc::sockaddr_in6>()
    }
  };
  (storage, len as libc::socklen_t)
}

fn into_addr(addr: SocketAddrV4) -> libc::sockaddr_in {
  // SAFETY: sockaddr_in is all primitive fields, zero is valid.
  let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };

  #[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
  ))]
  {
    raw.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
  }
  raw.sin_family = libc::AF_INET as libc::sa_family_t;
  raw.sin_port = addr.port().to_be();
  raw.sin_addr = libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() };

  raw
}

fn into_addr6(addr: SocketAddrV6) -> libc::sockaddr_in6 {
  // SAFETY: sockaddr_in6 is all primitive fields, zero is valid.
  let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };

  #[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
  ))]
  {
    raw.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
  }
  raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
  raw.sin6_port = addr.port().to_be();
  raw.sin6_addr = libc::in6_addr { s6_addr: addr.ip().octets() };
  raw.sin6_flowinfo = addr.flowinfo();
  raw.sin6_scope_id = addr.scope_id();

  raw
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn v4_round_trip() {
    let addr: SocketAddr = "192.168.1.7:8080".parse().unwrap();
    let (storage, len) = to_storage(addr);
    assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
    assert_eq!(to_socket_addr(&storage).unwrap(), addr);
  }

  #[test]
  fn v6_round_trip() {
    let addr: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
    let (storage, len) = to_storage(addr);
    assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in6>());
    assert_eq!(to_socket_addr(&storage).unwrap(), addr);
  }

  #[test]
  fn unknown_family_is_rejected() {
    // SAFETY: zeroed storage is a valid value with ss_family == AF_UNSPEC.
    let storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    assert_eq!(to_socket_addr(&storage), Err(Error::AddressFamilyNotSupported));
  }
}
