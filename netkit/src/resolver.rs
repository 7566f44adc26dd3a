//! Name and service resolution on top of `getaddrinfo(3)`.
//!
//! Resolution produces an owned list of [`Candidate`]s in the order the
//! system resolver returned them; callers try them one by one until a
//! connect or bind succeeds.

use std::{ffi::CString, fmt, mem, net::SocketAddr, ptr};

use crate::{
  addr,
  error::{Error, Result},
  socket::{AddressFamily, AddressProtocol},
};

/// A service to resolve, either by well-known name or by port number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
  Name(String),
  Port(u16),
}

impl fmt::Display for Service {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Name(name) => f.write_str(name),
      Self::Port(port) => write!(f, "{port}"),
    }
  }
}

impl From<u16> for Service {
  fn from(port: u16) -> Self {
    Self::Port(port)
  }
}

impl From<&str> for Service {
  fn from(name: &str) -> Self {
    Self::Name(name.to_owned())
  }
}

impl From<String> for Service {
  fn from(name: String) -> Self {
    Self::Name(name)
  }
}

/// Whether the resolved addresses will be connected to or bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
  Connect,
  Bind,
}

impl ResolveMode {
  fn flags(self) -> libc::c_int {
    match self {
      Self::Connect => libc::AI_ADDRCONFIG,
      Self::Bind => libc::AI_PASSIVE,
    }
  }
}

/// One resolver-produced address, ready to open a matching socket for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
  pub(crate) family: libc::c_int,
  pub(crate) socktype: libc::c_int,
  pub(crate) protocol: libc::c_int,
  pub addr: SocketAddr,
}

/// Resolves `host` and `service` into candidate addresses.
///
/// `host` of `None` with [`ResolveMode::Bind`] yields the wildcard
/// address. The returned list is never empty; an empty resolver result
/// is reported as [`Error::NetworkUnreachable`].
pub fn resolve(
  host: Option<&str>,
  service: &Service,
  family: AddressFamily,
  protocol: AddressProtocol,
  mode: ResolveMode,
) -> Result<Vec<Candidate>> {
  let host_c = match host {
    Some(h) => Some(CString::new(h).map_err(|_| Error::InvalidArgument)?),
    None => None,
  };
  let service_c = CString::new(service.to_string()).map_err(|_| Error::InvalidArgument)?;

  // SAFETY: zeroed addrinfo is a valid hints value.
  let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
  hints.ai_family = family.as_raw();
  hints.ai_socktype = protocol.socktype();
  hints.ai_flags = mode.flags();

  let mut list: *mut libc::addrinfo = ptr::null_mut();
  // SAFETY: the hints and name buffers outlive the call; list is freed
  // below on every path past this point.
  let rc = unsafe {
    libc::getaddrinfo(
      host_c.as_ref().map_or(ptr::null(), |h| h.as_ptr()),
      service_c.as_ptr(),
      &hints,
      &mut list,
    )
  };
  if rc != 0 {
    return Err(classify_gai(rc));
  }

  let mut candidates = Vec::new();
  let mut cursor = list;
  while !cursor.is_null() {
    // SAFETY: cursor walks the linked list getaddrinfo returned.
    let entry = unsafe { &*cursor };
    if !entry.ai_addr.is_null() {
      // SAFETY: ai_addrlen bytes are readable behind ai_addr; the copy
      // is clamped to the storage size.
      let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
      let copy_len =
        (entry.ai_addrlen as usize).min(mem::size_of::<libc::sockaddr_storage>());
      // SAFETY: source and destination are valid for copy_len bytes and
      // cannot overlap.
      unsafe {
        ptr::copy_nonoverlapping(
          entry.ai_addr.cast::<u8>(),
          (&raw mut storage).cast::<u8>(),
          copy_len,
        );
      }
      if let Ok(sockaddr) = addr::to_socket_addr(&storage) {
        candidates.push(Candidate {
          family: entry.ai_family,
          socktype: entry.ai_socktype,
          protocol: entry.ai_protocol,
          addr: sockaddr,
        });
      }
    }
    cursor = entry.ai_next;
  }
  // SAFETY: list came from getaddrinfo and is not touched again.
  unsafe { libc::freeaddrinfo(list) };

  if candidates.is_empty() {
    return Err(Error::NetworkUnreachable);
  }
  Ok(candidates)
}

/// Maps an `EAI_*` status onto the toolkit's error taxonomy.
fn classify_gai(code: libc::c_int) -> Error {
  match code {
    libc::EAI_AGAIN => Error::WouldBlock,
    libc::EAI_FAMILY => Error::AddressFamilyNotSupported,
    libc::EAI_NONAME | libc::EAI_FAIL => Error::NetworkUnreachable,
    libc::EAI_MEMORY => Error::OutOfMemory,
    libc::EAI_SYSTEM => Error::last_os_error(),
    libc::EAI_SOCKTYPE | libc::EAI_SERVICE | libc::EAI_BADFLAGS => Error::InvalidArgument,
    _ => Error::NotSupported,
  }
}
