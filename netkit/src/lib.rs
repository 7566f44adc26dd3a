//! Thread-based socket toolkit.
//!
//! netkit wraps raw sockets in an ownership handle, layers budgeted
//! transfer operations over non-blocking I/O, and builds two higher
//! pieces on top of them: a candidate-fallback [`Client`] and a
//! multiplexing, callback-driven [`Server`] backed by a bounded
//! [`WorkerPool`].
//!
//! Every blocking call takes a [`Timeout`] budget in milliseconds.
//! Waits decrement the budget by their measured elapsed time, partial
//! data survives timeouts and aborts, and a budget that has gone
//! negative is refused before any I/O happens.
//!
//! # Example
//!
//! An echo server and a client talking to it:
//!
//! ```no_run
//! use netkit::{
//!   AddressFamily, AddressProtocol, Client, Endpoint, Server, ServerHandler,
//!   ServerResponse, Timeout,
//! };
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!   fn on_receive(&self, _endpoint: &Endpoint, data: &[u8]) -> ServerResponse {
//!     ServerResponse::reply(data.to_vec())
//!   }
//! }
//!
//! # fn main() -> netkit::Result<()> {
//! let mut server = Server::new(Echo);
//! server.listen(None, 0u16, AddressFamily::Ipv4, AddressProtocol::Tcp)?;
//! let port = server.local_addr()?.port();
//!
//! let client = Client::new();
//! client.connect("localhost", port, AddressFamily::Ipv4, AddressProtocol::Tcp,
//!   Timeout::from_millis(1000))?;
//! let (res, _) = client.send(b"ping", Timeout::from_millis(1000));
//! res?;
//! let (res, echoed) = client.recv(4, Timeout::from_millis(1000));
//! res?;
//! assert_eq!(echoed, b"ping");
//! # Ok(())
//! # }
//! ```

mod addr;
pub mod client;
pub mod error;
pub mod ops;
pub mod pool;
pub mod resolver;
pub mod server;
pub mod socket;
pub mod timeout;

pub use client::Client;
pub use error::{Error, Result};
pub use ops::Interest;
pub use pool::{TaskHandle, WorkerPool};
pub use resolver::{Candidate, ResolveMode, Service, resolve};
pub use server::{ConnId, Endpoint, Server, ServerHandler, ServerResponse};
pub use socket::{AddressFamily, AddressProtocol, Socket};
pub use timeout::Timeout;
