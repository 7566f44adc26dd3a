//! HTTP/1.x response parsing.
//!
//! The parser is deliberately permissive: it understands the status
//! line, collects headers in arrival order (duplicates included), and
//! treats everything after the first blank line as body. Empty
//! segments produced by repeated blank lines are skipped, so a server
//! inserting extra CRLF pairs before the body does not corrupt it.

/// Reasons a byte buffer cannot be read as an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
  #[error("empty response")]
  Empty,
  #[error("response does not begin with an HTTP status line")]
  MissingStatusLine,
  #[error("malformed status line")]
  MalformedStatusLine,
  #[error("malformed protocol version")]
  MalformedVersion,
}

/// A parsed response: status line fields, headers and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
  /// Protocol version as (major, minor).
  pub version: (u32, u32),
  pub status: u32,
  /// Headers in arrival order; duplicates are preserved.
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl HttpResponse {
  /// Parses a complete response held in a string.
  pub fn parse(raw: &str) -> Result<Self, HttpError> {
    if raw.is_empty() {
      return Err(HttpError::Empty);
    }

    let mut segments = raw.split("\r\n\r\n").filter(|s| !s.is_empty());
    let Some(head) = segments.next() else {
      return Err(HttpError::MissingStatusLine);
    };

    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let Some(status_line) = lines.next() else {
      return Err(HttpError::MissingStatusLine);
    };
    if !status_line.starts_with("HTTP") {
      return Err(HttpError::MissingStatusLine);
    }

    let mut fields = status_line.split(' ').filter(|f| !f.is_empty());
    let version = parse_version(fields.next().ok_or(HttpError::MalformedStatusLine)?)?;
    let status = fields
      .next()
      .ok_or(HttpError::MalformedStatusLine)?
      .parse::<u32>()
      .map_err(|_| HttpError::MalformedStatusLine)?;
    // A status line carries at least version, code and reason phrase.
    if fields.next().is_none() {
      return Err(HttpError::MalformedStatusLine);
    }

    let mut headers = Vec::new();
    for line in lines {
      // Lines without a colon are not headers; skip them rather than
      // failing the whole response.
      if let Some((name, value)) = line.split_once(':') {
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
      }
    }

    let mut body = String::new();
    for segment in segments {
      body.push_str(segment.trim_start_matches(['\r', '\n']));
    }

    Ok(Self { version, status, headers, body })
  }

  /// Parses raw bytes; invalid UTF-8 is replaced, not rejected.
  pub fn from_bytes(raw: &[u8]) -> Result<Self, HttpError> {
    Self::parse(&String::from_utf8_lossy(raw))
  }

  /// First value of the named header, matched case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

/// Reads `"HTTP/1.1"` into `(1, 1)`.
fn parse_version(field: &str) -> Result<(u32, u32), HttpError> {
  let (_, version) = field.split_once('/').ok_or(HttpError::MalformedVersion)?;
  let (major, minor) = version.split_once('.').ok_or(HttpError::MalformedVersion)?;
  Ok((
    major.parse().map_err(|_| HttpError::MalformedVersion)?,
    minor.parse().map_err(|_| HttpError::MalformedVersion)?,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_response_with_a_stray_blank_line() {
    let raw = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\r\nBODY";
    let response = HttpResponse::parse(raw).unwrap();
    assert_eq!(response.version, (1, 1));
    assert_eq!(response.status, 200);
    assert_eq!(response.headers, vec![("Content-Type".to_owned(), "text/html".to_owned())]);
    assert_eq!(response.body, "BODY");
  }

  #[test]
  fn headers_keep_order_and_duplicates() {
    let raw = "HTTP/1.0 301 Moved\r\nSet-Cookie: a=1\r\nLocation: /next\r\nSet-Cookie: b=2\r\n\r\n";
    let response = HttpResponse::parse(raw).unwrap();
    assert_eq!(response.version, (1, 0));
    assert_eq!(response.status, 301);
    assert_eq!(
      response.headers,
      vec![
        ("Set-Cookie".to_owned(), "a=1".to_owned()),
        ("Location".to_owned(), "/next".to_owned()),
        ("Set-Cookie".to_owned(), "b=2".to_owned()),
      ]
    );
    assert!(response.body.is_empty());
  }

  #[test]
  fn header_values_may_contain_colons() {
    let raw = "HTTP/1.1 200 OK\r\nHost: example.com:8080\r\n\r\nok";
    let response = HttpResponse::parse(raw).unwrap();
    assert_eq!(response.header("host"), Some("example.com:8080"));
  }

  #[test]
  fn status_without_headers() {
    let response = HttpResponse::parse("HTTP/1.1 204 No Content\r\n\r\n").unwrap();
    assert_eq!(response.status, 204);
    assert!(response.headers.is_empty());
    assert!(response.body.is_empty());
  }

  #[test]
  fn empty_input_is_rejected() {
    assert_eq!(HttpResponse::parse(""), Err(HttpError::Empty));
  }

  #[test]
  fn non_http_input_is_rejected() {
    assert_eq!(
      HttpResponse::parse("SMTP ready\r\n\r\n"),
      Err(HttpError::MissingStatusLine)
    );
  }

  #[test]
  fn garbled_status_code_is_rejected() {
    assert_eq!(
      HttpResponse::parse("HTTP/1.1 abc OK\r\n\r\n"),
      Err(HttpError::MalformedStatusLine)
    );
  }

  #[test]
  fn status_line_without_a_reason_is_rejected() {
    assert_eq!(
      HttpResponse::parse("HTTP/1.1 200\r\n\r\n"),
      Err(HttpError::MalformedStatusLine)
    );
  }

  #[test]
  fn garbled_version_is_rejected() {
    assert_eq!(
      HttpResponse::parse("HTTP 200 OK\r\n\r\n"),
      Err(HttpError::MalformedVersion)
    );
    assert_eq!(
      HttpResponse::parse("HTTP/one.1 200 OK\r\n\r\n"),
      Err(HttpError::MalformedVersion)
    );
  }

  #[test]
  fn multi_segment_body_is_concatenated() {
    let raw = "HTTP/1.1 200 OK\r\n\r\nfirst\r\n\r\nsecond";
    let response = HttpResponse::parse(raw).unwrap();
    assert_eq!(response.body, "firstsecond");
  }

  #[test]
  fn lossy_bytes_still_parse() {
    let mut raw = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
    raw.extend_from_slice(&[0xff, 0xfe]);
    let response = HttpResponse::from_bytes(&raw).unwrap();
    assert_eq!(response.status, 200);
  }
}
