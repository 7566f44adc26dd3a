//! Multiplexing, callback-driven server.
//!
//! Two background threads share the work: an acceptor that admits new
//! connections on a fixed cadence, and a multiplexer that sweeps the
//! registry with a short `poll(2)` and hands readable connections to
//! the worker pool. A connection marked busy is skipped by the sweep
//! until its handler finishes, so at most one handler runs per
//! connection at any time.

use std::{
  cmp::Ordering as CmpOrdering,
  collections::HashMap,
  mem,
  net::{IpAddr, SocketAddr},
  os::fd::RawFd,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use log::{debug, trace, warn};

use crate::{
  addr,
  error::{Error, Result},
  ops,
  pool::WorkerPool,
  resolver::{self, ResolveMode, Service},
  socket::{AddressFamily, AddressProtocol, Socket},
  timeout::Timeout,
};

const ACCEPT_BACKLOG: libc::c_int = 10;
const ACCEPT_INTERVAL: Duration = Duration::from_millis(10);
const SWEEP_POLL_MILLIS: libc::c_int = 5;
const IDLE_SLEEP: Duration = Duration::from_millis(5);
/// Budget for every reply and broadcast send.
const REPLY_TIMEOUT: Timeout = Timeout::from_millis(1000);

const DEFAULT_START_WORKERS: usize = 2;
const DEFAULT_MAX_WORKERS: usize = 8;

/// Identifier a connection keeps for its whole lifetime.
///
/// Ids are assigned from a monotonic counter and never reused, so a
/// recycled descriptor value can never be mistaken for an old
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

/// An accepted connection: the owned socket plus the peer's address.
#[derive(Debug)]
pub struct Endpoint {
  socket: Socket,
  peer: SocketAddr,
}

impl Endpoint {
  pub fn socket(&self) -> &Socket {
    &self.socket
  }

  pub fn peer_addr(&self) -> SocketAddr {
    self.peer
  }

  pub fn ip(&self) -> IpAddr {
    self.peer.ip()
  }

  pub fn port(&self) -> u16 {
    self.peer.port()
  }
}

impl PartialEq for Endpoint {
  fn eq(&self, other: &Self) -> bool {
    self.socket == other.socket
  }
}

impl Eq for Endpoint {}

/// Ordered by descriptor value; endpoints without one sort last.
impl Ord for Endpoint {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    match (self.socket.raw().ok(), other.socket.raw().ok()) {
      (Some(a), Some(b)) => a.cmp(&b),
      (Some(_), None) => CmpOrdering::Less,
      (None, Some(_)) => CmpOrdering::Greater,
      (None, None) => CmpOrdering::Equal,
    }
  }
}

impl PartialOrd for Endpoint {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

/// What a callback asks the server to do with the connection next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerResponse {
  /// Bytes to send back, if any.
  pub reply: Option<Vec<u8>>,
  /// Close and deregister the connection after the reply.
  pub terminate: bool,
}

impl ServerResponse {
  /// Send nothing, keep the connection.
  pub fn empty() -> Self {
    Self::default()
  }

  /// Send `data`, keep the connection.
  pub fn reply(data: impl Into<Vec<u8>>) -> Self {
    Self { reply: Some(data.into()), terminate: false }
  }

  /// Send nothing, close the connection.
  pub fn terminate() -> Self {
    Self { reply: None, terminate: true }
  }

  /// Send `data`, then close the connection.
  pub fn reply_and_terminate(data: impl Into<Vec<u8>>) -> Self {
    Self { reply: Some(data.into()), terminate: true }
  }
}

/// Callbacks driving a [`Server`]. All methods default to doing
/// nothing, so a handler implements only what it cares about.
///
/// Callbacks run on acceptor and pool threads concurrently for
/// *different* connections; for any single connection they are
/// serialized by the busy flag.
pub trait ServerHandler: Send + Sync + 'static {
  /// A connection was accepted. The returned response may greet the
  /// peer or refuse it outright with `terminate`.
  fn on_connect(&self, _endpoint: &Endpoint) -> ServerResponse {
    ServerResponse::empty()
  }

  /// Data arrived on a registered connection.
  fn on_receive(&self, _endpoint: &Endpoint, _data: &[u8]) -> ServerResponse {
    ServerResponse::empty()
  }

  /// A transfer on the connection failed.
  fn on_error(&self, _endpoint: &Endpoint, _error: Error) {}
}

struct Connection {
  endpoint: Arc<Endpoint>,
  busy: bool,
}

struct ServerShared {
  registry: Mutex<HashMap<ConnId, Connection>>,
  handler: Arc<dyn ServerHandler>,
  active: AtomicBool,
  next_id: AtomicU64,
}

impl ServerShared {
  fn register(&self, endpoint: Arc<Endpoint>) -> ConnId {
    let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.registry.lock().unwrap().insert(id, Connection { endpoint, busy: false });
    id
  }

  fn deregister(&self, id: ConnId) {
    // The socket closes when the last Arc to the endpoint drops.
    self.registry.lock().unwrap().remove(&id);
  }
}

/// Clears the busy flag when dropped, so the flag cannot leak even if
/// a handler panics.
struct BusyGuard<'a> {
  shared: &'a ServerShared,
  id: ConnId,
}

impl Drop for BusyGuard<'_> {
  fn drop(&mut self) {
    if let Some(conn) = self.shared.registry.lock().unwrap().get_mut(&self.id) {
      conn.busy = false;
    }
  }
}

/// Multiplexing server dispatching to a [`ServerHandler`].
pub struct Server {
  shared: Arc<ServerShared>,
  pool: Arc<WorkerPool>,
  listener: Option<Socket>,
  accept_thread: Option<JoinHandle<()>>,
  sweep_thread: Option<JoinHandle<()>>,
}

impl Server {
  pub fn new(handler: impl ServerHandler) -> Self {
    Self::with_pool_size(handler, DEFAULT_START_WORKERS, DEFAULT_MAX_WORKERS)
  }

  /// Like [`new`](Server::new) with explicit worker pool bounds.
  pub fn with_pool_size(handler: impl ServerHandler, start_workers: usize, max_workers: usize) -> Self {
    Self {
      shared: Arc::new(ServerShared {
        registry: Mutex::new(HashMap::new()),
        handler: Arc::new(handler),
        active: AtomicBool::new(false),
        next_id: AtomicU64::new(0),
      }),
      pool: Arc::new(WorkerPool::new(start_workers, max_workers)),
      listener: None,
      accept_thread: None,
      sweep_thread: None,
    }
  }

  /// Binds, listens and starts the acceptor and multiplexer threads.
  ///
  /// A `host` of `None` binds the wildcard address. Resolver candidates
  /// are tried in order until one of them binds; `SO_REUSEADDR` is set
  /// on the listener so restarts do not trip over `TIME_WAIT`.
  pub fn listen(
    &mut self,
    host: Option<&str>,
    service: impl Into<Service>,
    family: AddressFamily,
    protocol: AddressProtocol,
  ) -> Result<()> {
    if self.listener.is_some() {
      self.stop();
    }

    let service = service.into();
    let candidates = resolver::resolve(host, &service, family, protocol, ResolveMode::Bind)?;
    let mut last_error = None;
    let mut bound = None;

    for candidate in &candidates {
      let socket = match Socket::create_raw(candidate.family, candidate.socktype, candidate.protocol) {
        Ok(socket) => socket,
        Err(err) => {
          last_error = Some(err);
          continue;
        }
      };
      if let Err(err) = socket.set_reuseaddr(true) {
        trace!("SO_REUSEADDR on {}: {err}", candidate.addr);
      }
      let prepared = socket
        .set_nonblocking(true)
        .and_then(|()| bind_socket(&socket, candidate.addr))
        .and_then(|()| {
          if protocol == AddressProtocol::Tcp { listen_socket(&socket) } else { Ok(()) }
        });
      match prepared {
        Ok(()) => {
          bound = Some(socket);
          break;
        }
        Err(err) => {
          trace!("cannot listen on {}: {err}", candidate.addr);
          last_error = Some(err);
        }
      }
    }

    let Some(listener) = bound else {
      return Err(last_error.unwrap_or(Error::NetworkUnreachable));
    };
    debug!("listening on {:?}", listener.local_addr());
    self.shared.active.store(true, Ordering::Release);

    // Datagram sockets have no accept queue; the acceptor would fail
    // on every tick.
    if protocol == AddressProtocol::Tcp {
      let listener_fd = listener.raw()?;
      let shared = Arc::clone(&self.shared);
      self.accept_thread = Some(thread::spawn(move || accept_loop(&shared, listener_fd)));
    }
    self.listener = Some(listener);

    let shared = Arc::clone(&self.shared);
    let pool = Arc::clone(&self.pool);
    self.sweep_thread = Some(thread::spawn(move || sweep_loop(&shared, &pool)));

    Ok(())
  }

  /// The listener's bound address, useful after listening on port 0.
  pub fn local_addr(&self) -> Result<SocketAddr> {
    self.listener.as_ref().ok_or(Error::NotConnected)?.local_addr()
  }

  pub fn is_active(&self) -> bool {
    self.shared.active.load(Ordering::Acquire)
  }

  /// Number of currently registered connections.
  pub fn connection_count(&self) -> usize {
    self.shared.registry.lock().unwrap().len()
  }

  /// Sends `data` to `targets`, or to every registered connection when
  /// `targets` is empty.
  ///
  /// The registry is snapshotted first and the lock released, so sends
  /// never block other threads out of the registry. Per-target results
  /// come back in the returned list; failures are additionally reported
  /// through [`ServerHandler::on_error`].
  pub fn send_data(&self, data: &[u8], targets: &[ConnId]) -> Vec<(ConnId, Result<()>)> {
    let snapshot: Vec<(ConnId, Arc<Endpoint>)> = {
      let registry = self.shared.registry.lock().unwrap();
      if targets.is_empty() {
        registry.iter().map(|(id, conn)| (*id, Arc::clone(&conn.endpoint))).collect()
      } else {
        targets
          .iter()
          .filter_map(|id| registry.get(id).map(|conn| (*id, Arc::clone(&conn.endpoint))))
          .collect()
      }
    };

    let mut results = Vec::with_capacity(snapshot.len());
    for (id, endpoint) in snapshot {
      let res = send_to_endpoint(&endpoint, data);
      if let Err(err) = &res {
        warn!("send to {} failed: {err}", endpoint.peer_addr());
        self.shared.handler.on_error(&endpoint, err.clone());
      }
      results.push((id, res));
    }
    results
  }

  /// Stops both threads, closes the listener and drops every
  /// registered connection. Idempotent.
  pub fn stop(&mut self) {
    self.shared.active.store(false, Ordering::Release);
    if let Some(handle) = self.accept_thread.take() {
      let _ = handle.join();
    }
    if let Some(handle) = self.sweep_thread.take() {
      let _ = handle.join();
    }
    if let Some(mut listener) = self.listener.take() {
      listener.close();
    }
    self.shared.registry.lock().unwrap().clear();
  }
}

impl Drop for Server {
  fn drop(&mut self) {
    self.stop();
  }
}

fn bind_socket(socket: &Socket, at: SocketAddr) -> Result<()> {
  let fd = socket.raw()?;
  let (storage, len) = addr::to_storage(at);
  // SAFETY: storage outlives the call and len matches its family.
  let rc = unsafe { libc::bind(fd, (&raw const storage).cast::<libc::sockaddr>(), len) };
  if rc == 0 { Ok(()) } else { Err(Error::last_os_error()) }
}

fn listen_socket(socket: &Socket) -> Result<()> {
  let fd = socket.raw()?;
  // SAFETY: plain syscall, no pointers involved.
  let rc = unsafe { libc::listen(fd, ACCEPT_BACKLOG) };
  if rc == 0 { Ok(()) } else { Err(Error::last_os_error()) }
}

/// Sends a full reply within [`REPLY_TIMEOUT`]; anything short of a
/// complete transfer is an error.
fn send_to_endpoint(endpoint: &Endpoint, data: &[u8]) -> Result<()> {
  if !endpoint.socket.is_valid() {
    return Err(Error::NotASocket);
  }
  let (res, sent) = ops::send(&endpoint.socket, data, REPLY_TIMEOUT);
  res?;
  if sent != data.len() {
    return Err(Error::MessageSize);
  }
  Ok(())
}

/// Admits one pending connection per tick until the server stops.
fn accept_loop(shared: &ServerShared, listener_fd: RawFd) {
  while shared.active.load(Ordering::Acquire) {
    thread::sleep(ACCEPT_INTERVAL);

    // SAFETY: zeroed storage is a valid out-parameter for accept.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: storage and len stay alive across the call and match.
    let fd = unsafe {
      libc::accept(listener_fd, (&raw mut storage).cast::<libc::sockaddr>(), &mut len)
    };
    if fd < 0 {
      let err = Error::last_os_error();
      if !err.is_transient() {
        warn!("accept failed: {err}");
      }
      continue;
    }

    let socket = Socket::from_raw(fd);
    let peer = match addr::to_socket_addr(&storage) {
      Ok(peer) => peer,
      Err(err) => {
        // Dropping the socket closes the descriptor.
        warn!("rejecting connection with unusable peer address: {err}");
        continue;
      }
    };
    if let Err(err) = socket.set_nonblocking(true) {
      warn!("cannot make {peer} non-blocking: {err}");
      continue;
    }

    trace!("accepted connection from {peer}");
    let endpoint = Arc::new(Endpoint { socket, peer });

    let greeting = shared.handler.on_connect(&endpoint);
    if let Some(reply) = greeting.reply
      && !reply.is_empty()
      && let Err(err) = send_to_endpoint(&endpoint, &reply)
    {
      shared.handler.on_error(&endpoint, err);
    }
    if greeting.terminate {
      // Never registered; the endpoint drops here and closes.
      trace!("connection from {peer} refused by handler");
      continue;
    }

    shared.register(endpoint);
  }
}

/// Sweeps idle registered connections with a short poll and dispatches
/// the readable ones to the pool, marking them busy first.
fn sweep_loop(shared: &Arc<ServerShared>, pool: &Arc<WorkerPool>) {
  while shared.active.load(Ordering::Acquire) {
    let idle: Vec<(ConnId, RawFd)> = {
      let registry = shared.registry.lock().unwrap();
      registry
        .iter()
        .filter(|(_, conn)| !conn.busy)
        .filter_map(|(id, conn)| conn.endpoint.socket.raw().ok().map(|fd| (*id, fd)))
        .collect()
    };
    if idle.is_empty() {
      thread::sleep(IDLE_SLEEP);
      continue;
    }

    let mut pollfds: Vec<libc::pollfd> = idle
      .iter()
      .map(|(_, fd)| libc::pollfd { fd: *fd, events: libc::POLLIN, revents: 0 })
      .collect();
    // SAFETY: the pollfds vector lives across the call.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, SWEEP_POLL_MILLIS) };
    if rc < 0 {
      let err = Error::last_os_error();
      if !err.is_transient() {
        warn!("registry sweep failed: {err}");
      }
      continue;
    }
    if rc == 0 {
      continue;
    }

    let ready: Vec<(ConnId, Arc<Endpoint>)> = {
      let mut registry = shared.registry.lock().unwrap();
      pollfds
        .iter()
        .zip(idle.iter())
        .filter(|(slot, _)| slot.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
        .filter_map(|(_, (id, _))| {
          registry.get_mut(id).map(|conn| {
            conn.busy = true;
            (*id, Arc::clone(&conn.endpoint))
          })
        })
        .collect()
    };

    for (id, endpoint) in ready {
      let shared = Arc::clone(shared);
      let _ = pool.submit(move || {
        let _busy = BusyGuard { shared: &shared, id };
        handle_client(&shared, id, &endpoint);
      });
    }
  }
}

/// Drains the connection once and runs the receive callback.
///
/// Readability was just confirmed by the sweep, so no extra wait
/// happens here; a handler never blocks a worker on a quiet socket.
fn handle_client(shared: &ServerShared, id: ConnId, endpoint: &Arc<Endpoint>) {
  let (res, data) = ops::recv_available(&endpoint.socket);

  if !data.is_empty() {
    let response = shared.handler.on_receive(endpoint, &data);
    if let Some(reply) = response.reply
      && !reply.is_empty()
      && let Err(err) = send_to_endpoint(endpoint, &reply)
    {
      shared.handler.on_error(endpoint, err);
    }
    if response.terminate {
      trace!("connection to {} terminated by handler", endpoint.peer_addr());
      shared.deregister(id);
      return;
    }
  }

  match res {
    Ok(()) | Err(Error::WouldBlock) => {}
    Err(Error::ConnectionAborted) => {
      trace!("peer {} went away", endpoint.peer_addr());
      shared.handler.on_error(endpoint, Error::ConnectionAborted);
      shared.deregister(id);
    }
    Err(err) => shared.handler.on_error(endpoint, err),
  }
}
