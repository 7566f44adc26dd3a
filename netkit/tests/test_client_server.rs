use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

use netkit::{
  AddressFamily, AddressProtocol, Client, Endpoint, Server, ServerHandler, ServerResponse,
};

fn start<H: ServerHandler>(handler: H) -> (Server, u16) {
  let mut server = Server::new(handler);
  server
    .listen(None, 0u16, AddressFamily::Ipv4, AddressProtocol::Tcp)
    .unwrap();
  let port = server.local_addr().unwrap().port();
  (server, port)
}

fn connect(port: u16) -> Client {
  let client = Client::new();
  client
    .connect("localhost", port, AddressFamily::Ipv4, AddressProtocol::Tcp,
      Duration::from_secs(1))
    .unwrap();
  client
}

struct Greeter {
  connected: Arc<AtomicBool>,
}

impl ServerHandler for Greeter {
  fn on_connect(&self, _endpoint: &Endpoint) -> ServerResponse {
    self.connected.store(true, Ordering::SeqCst);
    ServerResponse::reply(&b"hello!"[..])
  }
}

#[test]
fn greeting_arrives_on_connect() {
  let connected = Arc::new(AtomicBool::new(false));
  let (server, port) = start(Greeter { connected: Arc::clone(&connected) });

  let client = connect(port);
  thread::sleep(Duration::from_millis(100));
  assert!(connected.load(Ordering::SeqCst));
  assert_eq!(server.connection_count(), 1);

  let (res, greeting) = client.recv(6, Duration::from_secs(1));
  res.unwrap();
  assert_eq!(greeting, b"hello!");
}

struct Echo;

impl ServerHandler for Echo {
  fn on_receive(&self, _endpoint: &Endpoint, data: &[u8]) -> ServerResponse {
    ServerResponse::reply(data.to_vec())
  }
}

#[test]
fn echo_round_trip() {
  let (_server, port) = start(Echo);
  let client = connect(port);

  let (res, sent) = client.send(b"round trip", Duration::from_secs(1));
  res.unwrap();
  assert_eq!(sent, 10);

  let (res, echoed) = client.recv(10, Duration::from_secs(2));
  res.unwrap();
  assert_eq!(echoed, b"round trip");
}

#[test]
fn dropping_the_client_deregisters_it() {
  let (server, port) = start(Echo);

  {
    let _client = connect(port);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.connection_count(), 1);
  }

  // The drop closes the socket; the sweep notices and deregisters.
  thread::sleep(Duration::from_millis(300));
  assert_eq!(server.connection_count(), 0);
}

#[test]
fn broadcast_reaches_every_client() {
  let (server, port) = start(Echo);
  let first = connect(port);
  let second = connect(port);
  thread::sleep(Duration::from_millis(100));
  assert_eq!(server.connection_count(), 2);

  let results = server.send_data(b"ping", &[]);
  assert_eq!(results.len(), 2);
  assert!(results.iter().all(|(_, res)| res.is_ok()));

  for client in [&first, &second] {
    let (res, data) = client.recv(4, Duration::from_secs(1));
    res.unwrap();
    assert_eq!(data, b"ping");
  }
}

#[test]
fn targeted_send_skips_other_clients() {
  let (server, port) = start(Echo);
  let first = connect(port);
  let second = connect(port);
  thread::sleep(Duration::from_millis(100));

  let all = server.send_data(b"x", &[]);
  let target = all[0].0;
  let results = server.send_data(b"only you", &[target]);
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].0, target);
  results[0].1.as_ref().unwrap();
  thread::sleep(Duration::from_millis(100));

  // Both clients got the probe; exactly one got the targeted payload.
  let mut hits = 0;
  for client in [&first, &second] {
    let (res, data) = client.recv(0, Duration::from_millis(500));
    res.unwrap();
    if data.ends_with(b"only you") {
      hits += 1;
    }
  }
  assert_eq!(hits, 1);
}

#[test]
fn udp_listener_binds_without_an_acceptor() {
  let mut server = Server::new(Echo);
  server
    .listen(None, 0u16, AddressFamily::Ipv4, AddressProtocol::Udp)
    .unwrap();
  assert!(server.is_active());
  assert!(server.local_addr().unwrap().port() > 0);

  // No accept queue on a datagram socket, so nothing ever registers.
  thread::sleep(Duration::from_millis(100));
  assert_eq!(server.connection_count(), 0);

  server.stop();
  assert!(!server.is_active());
}

struct SlowHandler {
  in_flight: Arc<AtomicUsize>,
  max_seen: Arc<AtomicUsize>,
}

impl ServerHandler for SlowHandler {
  fn on_receive(&self, _endpoint: &Endpoint, _data: &[u8]) -> ServerResponse {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_seen.fetch_max(now, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    ServerResponse::empty()
  }
}

#[test]
fn one_connection_never_runs_two_handlers_at_once() {
  let in_flight = Arc::new(AtomicUsize::new(0));
  let max_seen = Arc::new(AtomicUsize::new(0));
  let (_server, port) = start(SlowHandler {
    in_flight: Arc::clone(&in_flight),
    max_seen: Arc::clone(&max_seen),
  });

  let client = connect(port);
  for _ in 0..10 {
    let (res, _) = client.send(b"burst", Duration::from_secs(1));
    res.unwrap();
    thread::sleep(Duration::from_millis(10));
  }
  thread::sleep(Duration::from_millis(500));

  assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
