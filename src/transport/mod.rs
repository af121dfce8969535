//! HTTP transport and SSE framing shared by the wire drivers.

pub mod http;
pub mod sse;

pub use http::{AuthStyle, HttpTransport, WireRequest};
pub use sse::{SseDecoder, SseFrame};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Other(String),
}
