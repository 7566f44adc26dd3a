//! Fetches a URL and prints the parsed response.

use std::env;

use netkit_http::HttpClient;

fn main() {
  let url = env::args().nth(1).unwrap_or_else(|| "http://example.com/".to_owned());

  let client = HttpClient::new();
  match client.get(&url) {
    Ok(response) => {
      println!("HTTP/{}.{} {}", response.version.0, response.version.1, response.status);
      for (name, value) in &response.headers {
        println!("{name}: {value}");
      }
      println!();
      println!("{}", response.body);
    }
    Err(err) => {
      eprintln!("GET {url} failed: {err}");
      std::process::exit(1);
    }
  }
}
