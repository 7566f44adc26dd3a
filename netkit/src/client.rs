//! Connection-oriented client with candidate fallback.
//!
//! `connect` resolves the target and walks the candidate list until one
//! address accepts the connection within the budget. Transfer calls are
//! serialized by an internal lock, so concurrent sends cannot
//! interleave their chunks; the `*_async` variants run the same code on
//! a single background worker and hand back a [`TaskHandle`].

use std::{
  net::SocketAddr,
  sync::{Arc, Mutex},
};

use log::{debug, trace};

use crate::{
  addr,
  error::{Error, Result},
  ops::{self, Interest},
  pool::{TaskHandle, WorkerPool},
  resolver::{self, ResolveMode, Service},
  socket::{AddressFamily, AddressProtocol, Socket},
  timeout::Timeout,
};

/// Default budget for connects and transfers.
pub const DEFAULT_TIMEOUT: Timeout = Timeout::from_millis(1000);

struct ActiveConnection {
  socket: Socket,
  peer: SocketAddr,
}

#[derive(Default)]
struct ClientState {
  conn: Option<ActiveConnection>,
}

/// A client holding at most one live connection.
pub struct Client {
  state: Arc<Mutex<ClientState>>,
  pool: WorkerPool,
}

impl Client {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(ClientState::default())),
      // One worker: async calls on the same client stay ordered.
      pool: WorkerPool::new(1, 1),
    }
  }

  pub fn is_connected(&self) -> bool {
    self.state.lock().unwrap().conn.as_ref().is_some_and(|c| c.socket.is_valid())
  }

  /// Address of the connected peer, if any.
  pub fn peer_addr(&self) -> Option<SocketAddr> {
    self.state.lock().unwrap().conn.as_ref().map(|c| c.peer)
  }

  /// Connects to `host`:`service`, trying resolver candidates in order.
  ///
  /// An existing connection is dropped first. Each candidate gets the
  /// full budget for its writability wait; the last candidate's error
  /// is reported when all of them fail. Failing to open a socket at all
  /// is fatal immediately, since that is a local resource problem no
  /// other candidate will fix.
  pub fn connect(
    &self,
    host: &str,
    service: impl Into<Service>,
    family: AddressFamily,
    protocol: AddressProtocol,
    timeout: impl Into<Timeout>,
  ) -> Result<()> {
    connect_locked(&self.state, host, &service.into(), family, protocol, timeout.into())
  }

  /// Background [`connect`](Client::connect).
  pub fn connect_async(
    &self,
    host: &str,
    service: impl Into<Service>,
    family: AddressFamily,
    protocol: AddressProtocol,
    timeout: impl Into<Timeout>,
  ) -> TaskHandle<Result<()>> {
    let state = Arc::clone(&self.state);
    let host = host.to_owned();
    let service = service.into();
    let timeout = timeout.into();
    self.pool.submit(move || connect_locked(&state, &host, &service, family, protocol, timeout))
  }

  /// Sends all of `data` within the budget.
  ///
  /// The pair carries the outcome plus how many bytes the kernel
  /// accepted before it.
  pub fn send(&self, data: &[u8], timeout: impl Into<Timeout>) -> (Result<()>, usize) {
    send_locked(&self.state, data, timeout.into())
  }

  /// Background [`send`](Client::send). Takes the payload by value so
  /// the task owns it.
  pub fn send_async(
    &self,
    data: Vec<u8>,
    timeout: impl Into<Timeout>,
  ) -> TaskHandle<(Result<()>, usize)> {
    let state = Arc::clone(&self.state);
    let timeout = timeout.into();
    self.pool.submit(move || send_locked(&state, &data, timeout))
  }

  /// Receives within the budget: exactly `byte_count` bytes, or with a
  /// `byte_count` of zero whatever arrives first. Partial data survives
  /// timeouts and aborts.
  pub fn recv(&self, byte_count: usize, timeout: impl Into<Timeout>) -> (Result<()>, Vec<u8>) {
    recv_locked(&self.state, byte_count, timeout.into())
  }

  /// Background [`recv`](Client::recv).
  pub fn recv_async(
    &self,
    byte_count: usize,
    timeout: impl Into<Timeout>,
  ) -> TaskHandle<(Result<()>, Vec<u8>)> {
    let state = Arc::clone(&self.state);
    let timeout = timeout.into();
    self.pool.submit(move || recv_locked(&state, byte_count, timeout))
  }

  /// Closes the connection. `NotConnected` when there was none.
  pub fn disconnect(&self) -> Result<()> {
    disconnect_locked(&self.state)
  }
}

impl Default for Client {
  fn default() -> Self {
    Self::new()
  }
}

fn connect_locked(
  state: &Mutex<ClientState>,
  host: &str,
  service: &Service,
  family: AddressFamily,
  protocol: AddressProtocol,
  timeout: Timeout,
) -> Result<()> {
  match disconnect_locked(state) {
    Ok(()) | Err(Error::NotConnected) => {}
    Err(err) => return Err(err),
  }

  let candidates = resolver::resolve(Some(host), service, family, protocol, ResolveMode::Connect)?;
  let mut last_error = None;

  for candidate in &candidates {
    let socket = Socket::create_raw(candidate.family, candidate.socktype, candidate.protocol)?;
    socket.set_nonblocking(true)?;

    match start_connect(&socket, candidate.addr) {
      Ok(()) => {}
      Err(err) if err.is_transient() => {
        // Completion will be reported through writability.
      }
      Err(err) => {
        trace!("candidate {} refused outright: {err}", candidate.addr);
        last_error = Some(err);
        continue;
      }
    }

    let (ready, _) = ops::wait_for_operation(&socket, Interest::Write, timeout);
    if let Err(err) = ready {
      trace!("candidate {} not writable: {err}", candidate.addr);
      last_error = Some(err);
      continue;
    }
    // Writability alone does not mean success for a non-blocking
    // connect; the verdict sits in SO_ERROR.
    match socket.take_error() {
      Ok(None) => {}
      Ok(Some(err)) | Err(err) => {
        trace!("candidate {} failed: {err}", candidate.addr);
        last_error = Some(err);
        continue;
      }
    }

    debug!("connected to {}", candidate.addr);
    let mut guard = state.lock().unwrap();
    guard.conn = Some(ActiveConnection { socket, peer: candidate.addr });
    return Ok(());
  }

  Err(last_error.unwrap_or(Error::NetworkUnreachable))
}

fn start_connect(socket: &Socket, peer: SocketAddr) -> Result<()> {
  let fd = socket.raw()?;
  let (storage, len) = addr::to_storage(peer);
  // SAFETY: storage outlives the call and len matches its family.
  let rc = unsafe { libc::connect(fd, (&raw const storage).cast::<libc::sockaddr>(), len) };
  if rc == 0 { Ok(()) } else { Err(Error::last_os_error()) }
}

fn send_locked(state: &Mutex<ClientState>, data: &[u8], timeout: Timeout) -> (Result<()>, usize) {
  let mut guard = state.lock().unwrap();
  let (res, sent) = match guard.conn.as_ref() {
    None => return (Err(Error::NotConnected), 0),
    Some(_) if timeout.is_negative() => return (Err(Error::TimedOut), 0),
    Some(conn) => ops::send(&conn.socket, data, timeout),
  };
  if matches!(res, Err(Error::ConnectionAborted)) {
    drop_connection(&mut guard);
  }
  (res, sent)
}

fn recv_locked(
  state: &Mutex<ClientState>,
  byte_count: usize,
  timeout: Timeout,
) -> (Result<()>, Vec<u8>) {
  let mut guard = state.lock().unwrap();
  let (res, data) = match guard.conn.as_ref() {
    None => return (Err(Error::NotConnected), Vec::new()),
    Some(_) if timeout.is_negative() => return (Err(Error::TimedOut), Vec::new()),
    Some(conn) => ops::recv(&conn.socket, byte_count, timeout),
  };
  if matches!(res, Err(Error::ConnectionAborted)) {
    drop_connection(&mut guard);
  }
  (res, data)
}

fn disconnect_locked(state: &Mutex<ClientState>) -> Result<()> {
  let mut guard = state.lock().unwrap();
  if guard.conn.is_none() {
    return Err(Error::NotConnected);
  }
  drop_connection(&mut guard);
  Ok(())
}

/// Eagerly tears down the connection so later calls see `NotConnected`.
fn drop_connection(state: &mut ClientState) {
  if let Some(mut conn) = state.conn.take() {
    trace!("dropping connection to {}", conn.peer);
    conn.socket.close();
  }
}
