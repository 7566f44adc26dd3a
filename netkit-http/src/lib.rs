//! Minimal HTTP/1.x support on top of [`netkit`].
//!
//! [`HttpResponse`] parses a raw response buffer without caring about
//! framing headers; [`HttpClient`] issues blocking (or pooled
//! background) GET requests and accumulates the answer until the wire
//! goes quiet.

pub mod client;
pub mod response;

pub use client::{GetError, HttpClient};
pub use response::{HttpError, HttpResponse};
