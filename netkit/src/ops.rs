//! Budgeted transfer operations over non-blocking sockets.
//!
//! Every blocking operation is a readiness wait followed by a
//! non-blocking syscall. Waits are measured and their elapsed time is
//! subtracted from the caller's [`Timeout`] budget, so a transfer that
//! needs several wait/IO cycles never exceeds the budget by more than
//! one poll interval.
//!
//! Transfer results are pairs: the outcome plus whatever data moved
//! before it, in the shape of `(Result<()>, usize)` for sends and
//! `(Result<()>, Vec<u8>)` for receives. Partial data always survives
//! an error.

use std::time::{Duration, Instant};

use crate::{
  error::{Error, Result},
  socket::Socket,
  timeout::Timeout,
};

/// Largest single chunk moved per syscall.
pub const MAX_CHUNK_SIZE: usize = 4096;

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const SEND_FLAGS: libc::c_int = 0;

/// Readiness direction for [`wait_for_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
  Read,
  Write,
  Both,
}

impl Interest {
  fn events(self) -> libc::c_short {
    match self {
      Self::Read => libc::POLLIN,
      Self::Write => libc::POLLOUT,
      Self::Both => libc::POLLIN | libc::POLLOUT,
    }
  }
}

/// Waits until `sock` is ready for `interest` or the budget runs out.
///
/// Returns the outcome together with the measured wall-clock time the
/// wait consumed, so callers can decrement their budget. A negative
/// budget is refused with `TimedOut` before any syscall; an exhausted
/// (zero) budget still performs one instant readiness check.
pub fn wait_for_operation(
  sock: &Socket,
  interest: Interest,
  timeout: Timeout,
) -> (Result<()>, Duration) {
  if timeout.is_negative() {
    return (Err(Error::TimedOut), Duration::ZERO);
  }
  let fd = match sock.raw() {
    Ok(fd) => fd,
    Err(err) => return (Err(err), Duration::ZERO),
  };

  let mut pollfd = libc::pollfd { fd, events: interest.events(), revents: 0 };
  let start = Instant::now();
  // SAFETY: the single-entry pollfd array lives across the call.
  let rc = unsafe { libc::poll(&mut pollfd, 1, timeout.poll_millis()) };
  let elapsed = start.elapsed();

  if rc < 0 {
    return (Err(Error::last_os_error()), elapsed);
  }
  if rc == 0 {
    return (Err(Error::TimedOut), elapsed);
  }
  if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
    let err = match sock.take_error() {
      Ok(Some(err)) => err,
      Ok(None) => Error::ConnectionAborted,
      Err(err) => err,
    };
    return (Err(err), elapsed);
  }
  // POLLHUP alone still counts as readable: pending data and the
  // orderly-shutdown zero read both come out of the recv path.
  (Ok(()), elapsed)
}

/// Sends all of `data` in chunks of at most [`MAX_CHUNK_SIZE`] bytes.
///
/// Each chunk is preceded by a writability wait against the remaining
/// budget. The byte count reports how much was accepted by the kernel
/// before success or failure.
pub fn send(sock: &Socket, data: &[u8], timeout: Timeout) -> (Result<()>, usize) {
  let fd = match sock.raw() {
    Ok(fd) => fd,
    Err(err) => return (Err(err), 0),
  };

  let mut budget = timeout;
  let mut sent = 0usize;
  while sent < data.len() {
    let (ready, elapsed) = wait_for_operation(sock, Interest::Write, budget);
    budget = budget.consume(elapsed);
    if let Err(err) = ready {
      return (Err(err), sent);
    }

    let chunk = (data.len() - sent).min(MAX_CHUNK_SIZE);
    // SAFETY: sent..sent + chunk is in bounds of data.
    let rc = unsafe {
      libc::send(fd, data[sent..].as_ptr().cast::<libc::c_void>(), chunk, SEND_FLAGS)
    };
    if rc > 0 {
      sent += rc as usize;
    } else if rc == 0 {
      return (Err(Error::ConnectionAborted), sent);
    } else {
      let err = Error::last_os_error();
      if !err.is_transient() {
        return (Err(err), sent);
      }
      // transient: go around for another wait/write cycle
    }
  }
  (Ok(()), sent)
}

/// Receives from `sock` within the budget.
///
/// With a non-zero `byte_count` this loops wait/read cycles until
/// exactly that many bytes arrived, the budget ran out (`TimedOut` with
/// the partial data), or the peer closed (`ConnectionAborted` with the
/// partial data).
///
/// A `byte_count` of zero means "whatever is there": one readability
/// wait within the budget, then a single best-effort drain of
/// everything currently queued.
pub fn recv(sock: &Socket, byte_count: usize, timeout: Timeout) -> (Result<()>, Vec<u8>) {
  if byte_count == 0 {
    let (ready, _) = wait_for_operation(sock, Interest::Read, timeout);
    if let Err(err) = ready {
      return (Err(err), Vec::new());
    }
    return recv_available(sock);
  }

  let mut budget = timeout;
  let mut data = Vec::with_capacity(byte_count.min(MAX_CHUNK_SIZE));
  loop {
    let (ready, elapsed) = wait_for_operation(sock, Interest::Read, budget);
    budget = budget.consume(elapsed);
    if let Err(err) = ready {
      return (Err(err), data);
    }

    let (res, chunk) = drain(sock, byte_count - data.len());
    data.extend_from_slice(&chunk);
    if data.len() == byte_count {
      return (Ok(()), data);
    }
    match res {
      Ok(()) | Err(Error::WouldBlock) => {}
      Err(err) => return (Err(err), data),
    }
    if budget.is_exhausted() {
      return (Err(Error::TimedOut), data);
    }
  }
}

/// Drains everything currently readable without waiting.
///
/// Hitting would-block after at least one byte is a success; hitting it
/// with nothing read is reported as [`Error::WouldBlock`] so callers
/// can tell a quiet socket from an empty message.
pub fn recv_available(sock: &Socket) -> (Result<()>, Vec<u8>) {
  let (res, data) = drain(sock, 0);
  match res {
    Err(Error::WouldBlock) if !data.is_empty() => (Ok(()), data),
    other => (other, data),
  }
}

/// Reads until `limit` bytes arrived (0 meaning unbounded), the socket
/// would block, or the peer closed.
fn drain(sock: &Socket, limit: usize) -> (Result<()>, Vec<u8>) {
  let fd = match sock.raw() {
    Ok(fd) => fd,
    Err(err) => return (Err(err), Vec::new()),
  };

  let mut data = Vec::new();
  let mut buf = [0u8; MAX_CHUNK_SIZE];
  loop {
    let want = if limit == 0 { MAX_CHUNK_SIZE } else { (limit - data.len()).min(MAX_CHUNK_SIZE) };
    // SAFETY: buf is writable for want <= MAX_CHUNK_SIZE bytes.
    let rc = unsafe { libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), want, 0) };
    if rc > 0 {
      data.extend_from_slice(&buf[..rc as usize]);
      if limit != 0 && data.len() >= limit {
        return (Ok(()), data);
      }
    } else if rc == 0 {
      return (Err(Error::ConnectionAborted), data);
    } else {
      match Error::last_os_error() {
        Error::Interrupted => {}
        Error::WouldBlock => return (Err(Error::WouldBlock), data),
        err => return (Err(err), data),
      }
    }
  }
}
