//! Blocking HTTP GET on top of [`netkit::Client`].
//!
//! The client does not rely on `Content-Length` or chunked framing.
//! It accumulates the response in short receive ticks and considers it
//! complete when a tick passes with data in hand but nothing new on
//! the wire, or when the server closes the connection after serving.

use std::{sync::Arc, time::Instant};

use log::{debug, trace};

use netkit::{
  AddressFamily, AddressProtocol, Client, Error, TaskHandle, Timeout, WorkerPool,
};

use crate::response::{HttpError, HttpResponse};

/// Receive tick: the quiet period that ends accumulation.
const RECV_TICK: Timeout = Timeout::from_millis(50);
/// Budget for connects and the request send.
const REQUEST_TIMEOUT: Timeout = Timeout::from_millis(1000);
/// Default ceiling for a whole GET exchange.
const DEFAULT_TOTAL_TIMEOUT: Timeout = Timeout::from_millis(5000);

/// Why a GET produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GetError {
  #[error("unsupported url: {0}")]
  UnsupportedUrl(String),
  #[error(transparent)]
  Transport(#[from] Error),
  #[error(transparent)]
  Parse(#[from] HttpError),
}

struct Target {
  host: String,
  port: u16,
  path: String,
}

/// Splits `http://host[:port][/path]` into its parts. Only plain HTTP
/// is supported; anything else is refused up front.
fn parse_url(url: &str) -> Result<Target, GetError> {
  let rest = match url.split_once("://") {
    Some(("http", rest)) => rest,
    Some(_) => return Err(GetError::UnsupportedUrl(url.to_owned())),
    None => url,
  };
  let (authority, path) = match rest.split_once('/') {
    Some((authority, path)) => (authority, format!("/{path}")),
    None => (rest, "/".to_owned()),
  };
  if authority.is_empty() {
    return Err(GetError::UnsupportedUrl(url.to_owned()));
  }
  let (host, port) = match authority.rsplit_once(':') {
    Some((host, port)) => {
      let port = port.parse().map_err(|_| GetError::UnsupportedUrl(url.to_owned()))?;
      (host.to_owned(), port)
    }
    None => (authority.to_owned(), 80),
  };
  Ok(Target { host, port, path })
}

/// A GET client holding one connection at a time.
pub struct HttpClient {
  client: Arc<Client>,
  pool: WorkerPool,
  total_timeout: Timeout,
}

impl HttpClient {
  pub fn new() -> Self {
    Self::with_timeout(DEFAULT_TOTAL_TIMEOUT)
  }

  /// Like [`new`](HttpClient::new) with an explicit overall budget per
  /// request.
  pub fn with_timeout(total_timeout: Timeout) -> Self {
    Self {
      client: Arc::new(Client::new()),
      pool: WorkerPool::new(1, 1),
      total_timeout,
    }
  }

  /// Fetches `url` and parses the response.
  pub fn get(&self, url: &str) -> Result<HttpResponse, GetError> {
    get_with(&self.client, url, self.total_timeout)
  }

  /// Background [`get`](HttpClient::get).
  pub fn get_async(&self, url: &str) -> TaskHandle<Result<HttpResponse, GetError>> {
    let client = Arc::clone(&self.client);
    let url = url.to_owned();
    let total = self.total_timeout;
    self.pool.submit(move || get_with(&client, &url, total))
  }
}

impl Default for HttpClient {
  fn default() -> Self {
    Self::new()
  }
}

fn get_with(client: &Client, url: &str, total: Timeout) -> Result<HttpResponse, GetError> {
  let target = parse_url(url)?;

  if !client.is_connected() {
    client.connect(
      &target.host,
      target.port,
      AddressFamily::Unspecified,
      AddressProtocol::Tcp,
      REQUEST_TIMEOUT,
    )?;
  }

  let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", target.path, target.host);
  debug!("GET http://{}:{}{}", target.host, target.port, target.path);
  let (res, _) = client.send(request.as_bytes(), REQUEST_TIMEOUT);
  res?;

  let mut buffer = Vec::new();
  let mut budget = total;
  loop {
    // Charge the budget for the tick's actual wall-clock time; a tick
    // that returns early with data must not cost a full tick.
    let tick_start = Instant::now();
    let (res, chunk) = client.recv(0, RECV_TICK);
    budget = budget.consume(tick_start.elapsed());
    buffer.extend_from_slice(&chunk);
    match res {
      Ok(()) => trace!("accumulated {} bytes", buffer.len()),
      // A quiet tick with data in hand means the response is over.
      Err(Error::TimedOut) if !buffer.is_empty() => break,
      Err(Error::TimedOut) => {}
      // Connection closed after serving: also a complete response.
      Err(Error::ConnectionAborted) if !buffer.is_empty() => break,
      Err(err) => return Err(err.into()),
    }
    if budget.is_exhausted() {
      if buffer.is_empty() {
        return Err(Error::TimedOut.into());
      }
      break;
    }
  }

  Ok(HttpResponse::from_bytes(&buffer)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_with_scheme_port_and_path() {
    let target = parse_url("http://example.com:8080/a/b").unwrap();
    assert_eq!(target.host, "example.com");
    assert_eq!(target.port, 8080);
    assert_eq!(target.path, "/a/b");
  }

  #[test]
  fn bare_host_defaults_to_port_80_and_root() {
    let target = parse_url("example.com").unwrap();
    assert_eq!(target.host, "example.com");
    assert_eq!(target.port, 80);
    assert_eq!(target.path, "/");
  }

  #[test]
  fn https_is_refused() {
    assert!(matches!(
      parse_url("https://example.com/"),
      Err(GetError::UnsupportedUrl(_))
    ));
  }

  #[test]
  fn empty_authority_is_refused() {
    assert!(matches!(parse_url("http:///x"), Err(GetError::UnsupportedUrl(_))));
  }
}
