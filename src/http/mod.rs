//! Minimal HTTP/1.1 client-side wire handling.
//!
//! Only what a latency probe needs: write a bodiless request, parse the
//! status line and header block, and expose the body either as a chunked
//! decoder or as the raw connection until the peer closes it.

mod chunked;
mod conn;
mod request;
mod response;

pub use chunked::*;
pub use conn::*;
pub use request::*;
pub use response::*;

use std::io;
use thiserror::Error;

/// Longest status, header or chunk-size line accepted from a peer.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors raised while reading or writing HTTP on the wire.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("malformed response line: {0}")]
    MalformedStatusLine(String),
    #[error("malformed HTTP status code: {0}")]
    MalformedStatusCode(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("chunked-reader: empty chunk size line")]
    EmptyChunkSize,
    #[error("chunked-reader: invalid chunk size {0:?}")]
    InvalidChunkSize(String),
    #[error("chunked-reader: invalid CRLF after chunk")]
    BadChunkTrailer,
    #[error("line exceeds {MAX_LINE_LEN} bytes")]
    LineTooLong,
    #[error("unexpected EOF")]
    UnexpectedEof,
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl HttpError {
    /// True for violations of the wire format, false for transport failures.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, HttpError::Io(_) | HttpError::UnexpectedEof)
    }
}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            HttpError::UnexpectedEof
        } else {
            HttpError::Io(e)
        }
    }
}
