//! Streaming decoder for `Transfer-Encoding: chunked` bodies.

use super::{ConnCloser, HttpError};

use tokio::io::{AsyncRead, AsyncWrite};

/// Result of one body read: bytes placed in the caller's buffer, and whether
/// the end of the body was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyRead {
    pub len: usize,
    pub eof: bool,
}

impl BodyRead {
    fn more(len: usize) -> Self {
        Self { len, eof: false }
    }

    fn end(len: usize) -> Self {
        Self { len, eof: true }
    }
}

/// Chunked body decoder reading straight off the connection.
///
/// Chunk extensions and trailer headers are not supported.
pub struct ChunkedReader<S> {
    conn: ConnCloser<S>,
    /// Bytes left in the current chunk.
    remaining: usize,
    finished: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ChunkedReader<S> {
    pub fn new(conn: ConnCloser<S>) -> Self {
        Self {
            conn,
            remaining: 0,
            finished: false,
        }
    }

    /// Fill `buf` with decoded body bytes.
    ///
    /// Returns early with `eof` set as soon as the zero-size chunk is seen.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<BodyRead, HttpError> {
        if self.finished {
            return Ok(BodyRead::end(0));
        }

        let mut filled = 0;
        while filled < buf.len() {
            if self.remaining == 0 {
                let size = self.read_chunk_size().await?;
                if size == 0 {
                    self.finished = true;
                    return Ok(BodyRead::end(filled));
                }
                self.remaining = size;
            }

            let n = (buf.len() - filled).min(self.remaining);
            self.conn.read_exact(&mut buf[filled..filled + n]).await?;
            filled += n;
            self.remaining -= n;

            if self.remaining == 0 {
                self.expect_crlf().await?;
            }
        }
        Ok(BodyRead::more(filled))
    }

    pub async fn close(self) -> Result<(), HttpError> {
        self.conn.close().await
    }

    async fn read_chunk_size(&mut self) -> Result<usize, HttpError> {
        let line = self.conn.read_line().await?;
        let line = line.trim_end();
        if line.is_empty() {
            return Err(HttpError::EmptyChunkSize);
        }
        if !line.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HttpError::InvalidChunkSize(line.to_string()));
        }

        u64::from_str_radix(line, 16)
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| HttpError::InvalidChunkSize(line.to_string()))
    }

    async fn expect_crlf(&mut self) -> Result<(), HttpError> {
        let mut crlf = [0u8; 2];
        self.conn.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(HttpError::BadChunkTrailer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::conn::wire;

    async fn decode_all<S: AsyncRead + AsyncWrite + Unpin>(
        rd: &mut ChunkedReader<S>,
        step: usize,
    ) -> Result<(Vec<u8>, usize), HttpError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; step];
        let mut eofs = 0;
        loop {
            let r = rd.read(&mut buf).await?;
            out.extend_from_slice(&buf[..r.len]);
            if r.eof {
                eofs += 1;
                return Ok((out, eofs));
            }
        }
    }

    #[tokio::test]
    async fn test_decodes_concatenated_payload() {
        let wire_bytes = b"5\r\nhello\r\n1\r\n \r\nB\r\nchunked wor\r\n2\r\nld\r\n0\r\n\r\n";
        for step in [1, 3, 7, 64] {
            let mut rd = ChunkedReader::new(wire(wire_bytes).await);
            let (body, eofs) = decode_all(&mut rd, step).await.unwrap();
            assert_eq!(body, b"hello chunked world", "step {}", step);
            assert_eq!(eofs, 1);
        }
    }

    #[tokio::test]
    async fn test_eof_reported_with_bytes_of_same_call() {
        let mut rd = ChunkedReader::new(wire(b"3\r\nabc\r\n0\r\n").await);
        let mut buf = [0u8; 16];
        let r = rd.read(&mut buf).await.unwrap();
        assert_eq!(r, BodyRead { len: 3, eof: true });
        assert_eq!(&buf[..3], b"abc");

        // Later reads stay at EOF without touching the stream.
        let again = rd.read(&mut buf).await.unwrap();
        assert_eq!(again, BodyRead { len: 0, eof: true });
    }

    #[tokio::test]
    async fn test_exactly_filled_buffer_defers_eof() {
        let mut rd = ChunkedReader::new(wire(b"4\r\nabcd\r\n0\r\n").await);
        let mut buf = [0u8; 4];
        assert_eq!(rd.read(&mut buf).await.unwrap(), BodyRead { len: 4, eof: false });
        assert_eq!(rd.read(&mut buf).await.unwrap(), BodyRead { len: 0, eof: true });
    }

    #[tokio::test]
    async fn test_hex_sizes_any_case() {
        let mut payload = b"a\r\n0123456789\r\nA\r\n0123456789\r\n".to_vec();
        payload.extend_from_slice(b"0\r\n");
        let mut rd = ChunkedReader::new(wire(&payload).await);
        let (body, _) = decode_all(&mut rd, 32).await.unwrap();
        assert_eq!(body.len(), 20);
    }

    #[tokio::test]
    async fn test_bad_trailer_fails_without_consuming_next_chunk() {
        for trailer in [&b"XY"[..], b"\n\r", b"\r\r", b"ab"] {
            let mut bytes = b"3\r\nabc".to_vec();
            bytes.extend_from_slice(trailer);
            bytes.extend_from_slice(b"4\r\nnext\r\n0\r\n\r\n");

            let mut rd = ChunkedReader::new(wire(&bytes).await);
            let mut buf = [0u8; 32];
            assert!(matches!(
                rd.read(&mut buf).await,
                Err(HttpError::BadChunkTrailer)
            ));

            // The next chunk is still intact on the connection.
            assert_eq!(rd.conn.read_line().await.unwrap(), "4");
        }
    }

    #[tokio::test]
    async fn test_invalid_chunk_sizes() {
        for size_line in ["zz", "+5", "-1", "0x10", "5;ext=1", "ffffffffffffffffff"] {
            let bytes = format!("{}\r\nhello\r\n0\r\n\r\n", size_line);
            let mut rd = ChunkedReader::new(wire(bytes.as_bytes()).await);
            let mut buf = [0u8; 8];
            assert!(
                matches!(rd.read(&mut buf).await, Err(HttpError::InvalidChunkSize(_))),
                "size line {:?}",
                size_line
            );
        }
    }

    #[tokio::test]
    async fn test_empty_size_line_is_framing_error() {
        let mut rd = ChunkedReader::new(wire(b"\r\nhello").await);
        let mut buf = [0u8; 8];
        assert!(matches!(
            rd.read(&mut buf).await,
            Err(HttpError::EmptyChunkSize)
        ));
    }

    #[tokio::test]
    async fn test_short_chunk_data() {
        let mut rd = ChunkedReader::new(wire(b"10\r\nshort").await);
        let mut buf = [0u8; 32];
        assert!(matches!(
            rd.read(&mut buf).await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_trailing_whitespace_on_size_line() {
        let mut rd = ChunkedReader::new(wire(b"2 \t\r\nok\r\n0\r\n").await);
        let (body, eofs) = decode_all(&mut rd, 8).await.unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(eofs, 1);
    }
}
