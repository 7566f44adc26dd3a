use std::{
  net::TcpListener,
  time::{Duration, Instant},
};

use netkit::{AddressFamily, AddressProtocol, Client, Timeout};

#[test]
fn connect_to_an_unresponsive_address_times_out() {
  let client = Client::new();
  let start = Instant::now();
  // TEST-NET-1: guaranteed unrouted, nothing will ever answer.
  let res = client.connect(
    "192.0.2.1",
    9u16,
    AddressFamily::Ipv4,
    AddressProtocol::Tcp,
    Timeout::from_millis(300),
  );
  let elapsed = start.elapsed();

  assert!(res.is_err());
  assert!(!client.is_connected());
  // Fails fast on an unroutable network, waits the budget otherwise;
  // either way it must not hang.
  assert!(elapsed < Duration::from_secs(5), "budget ignored: {elapsed:?}");
}

#[test]
fn connect_to_a_closed_port_is_refused() {
  // Grab an ephemeral port the kernel considers free, then release it.
  let probe = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = probe.local_addr().unwrap().port();
  drop(probe);

  let client = Client::new();
  let res = client.connect(
    "127.0.0.1",
    port,
    AddressFamily::Ipv4,
    AddressProtocol::Tcp,
    Timeout::from_millis(1000),
  );
  assert!(res.is_err());
  assert!(!client.is_connected());
}

#[test]
fn unresolvable_host_fails_before_any_socket_work() {
  let client = Client::new();
  let start = Instant::now();
  let res = client.connect(
    "definitely-not-a-real-host.invalid",
    80u16,
    AddressFamily::Unspecified,
    AddressProtocol::Tcp,
    Timeout::from_millis(5000),
  );
  assert!(res.is_err());
  // Resolution failure must not burn the connect budget.
  assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn reconnect_replaces_the_old_connection() {
  let keeper = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = keeper.local_addr().unwrap().port();

  let client = Client::new();
  client
    .connect("127.0.0.1", port, AddressFamily::Ipv4, AddressProtocol::Tcp,
      Timeout::from_millis(1000))
    .unwrap();
  let first_peer = client.peer_addr().unwrap();

  client
    .connect("127.0.0.1", port, AddressFamily::Ipv4, AddressProtocol::Tcp,
      Timeout::from_millis(1000))
    .unwrap();
  assert!(client.is_connected());
  assert_eq!(client.peer_addr().unwrap(), first_peer);
}

#[test]
fn async_connect_reports_through_the_handle() {
  let keeper = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = keeper.local_addr().unwrap().port();

  let client = Client::new();
  let handle = client.connect_async(
    "127.0.0.1",
    port,
    AddressFamily::Ipv4,
    AddressProtocol::Tcp,
    Timeout::from_millis(1000),
  );
  handle.wait().unwrap().unwrap();
  assert!(client.is_connected());
}
