//! Buffered connection wrapper that owns all reads from the transport.

use super::{HttpError, MAX_LINE_LEN};

use std::io;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Any duplex byte stream a probe can speak HTTP over (plain TCP or TLS).
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Buffered reader over a connection; closing it closes the connection.
///
/// Once a stream is wrapped, every read goes through this type so that bytes
/// buffered by the line reader are never skipped by a later fixed-size read.
pub struct ConnCloser<S> {
    reader: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnCloser<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Mutable access to the transport, for writing the request.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    /// Read one LF-terminated line, without the trailing CR LF.
    ///
    /// End of stream before the terminator is `UnexpectedEof`.
    pub async fn read_line(&mut self) -> Result<String, HttpError> {
        let mut raw = Vec::new();
        let limit = MAX_LINE_LEN as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut raw)
            .await?;

        if raw.last() != Some(&b'\n') {
            if n as u64 >= limit {
                return Err(HttpError::LineTooLong);
            }
            return Err(HttpError::UnexpectedEof);
        }

        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Fill `buf` completely; a short read is `UnexpectedEof`.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), HttpError> {
        self.reader.read_exact(buf).await?;
        Ok(())
    }

    /// Read whatever is available, returning 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        Ok(self.reader.read(buf).await?)
    }

    /// Shut down and drop the transport, discarding any buffered bytes.
    pub async fn close(self) -> Result<(), HttpError> {
        let mut stream = self.reader.into_inner();
        match stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Wrap `bytes` as the entire remaining contents of a connection.
#[cfg(test)]
pub(crate) async fn wire(bytes: &[u8]) -> ConnCloser<tokio::io::DuplexStream> {
    let (client, mut server) = tokio::io::duplex(bytes.len() + 1024);
    server.write_all(bytes).await.unwrap();
    drop(server);
    ConnCloser::new(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_strips_terminators() {
        let mut conn = wire(b"first\r\nsecond\nthird  \r\n").await;
        assert_eq!(conn.read_line().await.unwrap(), "first");
        assert_eq!(conn.read_line().await.unwrap(), "second");
        assert_eq!(conn.read_line().await.unwrap(), "third  ");
    }

    #[tokio::test]
    async fn test_read_line_partial_is_unexpected_eof() {
        let mut conn = wire(b"no newline").await;
        assert!(matches!(
            conn.read_line().await,
            Err(HttpError::UnexpectedEof)
        ));

        let mut empty = wire(b"").await;
        assert!(matches!(
            empty.read_line().await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let long = vec![b'a'; MAX_LINE_LEN + 10];
        let mut conn = wire(&long).await;
        assert!(matches!(conn.read_line().await, Err(HttpError::LineTooLong)));
    }

    #[tokio::test]
    async fn test_line_then_fixed_reads_share_buffer() {
        let mut conn = wire(b"5\r\nhello").await;
        assert_eq!(conn.read_line().await.unwrap(), "5");

        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        let mut more = [0u8; 1];
        assert!(matches!(
            conn.read_exact(&mut more).await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_close_with_unread_bytes() {
        let stream = tokio_test::io::Builder::new().build();
        let conn = ConnCloser::new(stream);
        conn.close().await.unwrap();

        let mut conn = wire(b"left over").await;
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        conn.close().await.unwrap();
    }
}
