//! Line-at-a-time echo server.
//!
//! Run it, then talk to it with `nc 127.0.0.1 <port>`.

use std::{env, thread, time::Duration};

use netkit::{
  AddressFamily, AddressProtocol, Endpoint, Error, Server, ServerHandler, ServerResponse,
};

struct Echo;

impl ServerHandler for Echo {
  fn on_connect(&self, endpoint: &Endpoint) -> ServerResponse {
    println!("+ {}", endpoint.peer_addr());
    ServerResponse::reply(&b"welcome\n"[..])
  }

  fn on_receive(&self, endpoint: &Endpoint, data: &[u8]) -> ServerResponse {
    println!("  {} sent {} bytes", endpoint.peer_addr(), data.len());
    ServerResponse::reply(data.to_vec())
  }

  fn on_error(&self, endpoint: &Endpoint, error: Error) {
    println!("- {} ({error})", endpoint.peer_addr());
  }
}

fn main() -> netkit::Result<()> {
  let port: u16 = env::args().nth(1).and_then(|arg| arg.parse().ok()).unwrap_or(7000);

  let mut server = Server::new(Echo);
  server.listen(None, port, AddressFamily::Ipv4, AddressProtocol::Tcp)?;
  println!("echoing on {}", server.local_addr()?);

  loop {
    thread::sleep(Duration::from_secs(1));
  }
}
