//! Status line, header block and body framing of an HTTP/1.1 response.

use super::{BodyRead, ChunkedReader, ConnCloser, HttpError};

use http::header::TRANSFER_ENCODING;
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncRead, AsyncWrite};

/// Parsed first line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Protocol token, e.g. `HTTP/1.1`.
    pub proto: String,
    /// Everything after the protocol token, e.g. `200 OK`.
    pub status: String,
    pub code: u16,
}

/// Split a status line into protocol, status text and the 3-digit code.
pub fn parse_status_line(line: &str) -> Result<StatusLine, HttpError> {
    let (proto, status) = line
        .split_once(' ')
        .ok_or_else(|| HttpError::MalformedStatusLine(line.to_string()))?;

    let code = status.split_once(' ').map_or(status, |(code, _)| code);
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::MalformedStatusCode(status.to_string()));
    }
    let code = code
        .parse()
        .map_err(|_| HttpError::MalformedStatusCode(status.to_string()))?;

    Ok(StatusLine {
        proto: proto.to_string(),
        status: status.to_string(),
        code,
    })
}

/// Response body: chunked decoder, or the raw connection until close.
pub enum Body<S> {
    Chunked(ChunkedReader<S>),
    /// No chunked framing: the body runs until the peer closes.
    /// Content-Length is not enforced.
    UntilClose(ConnCloser<S>),
}

impl<S: AsyncRead + AsyncWrite + Unpin> Body<S> {
    pub fn is_chunked(&self) -> bool {
        matches!(self, Body::Chunked(_))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<BodyRead, HttpError> {
        match self {
            Body::Chunked(rd) => rd.read(buf).await,
            Body::UntilClose(conn) => {
                if buf.is_empty() {
                    return Ok(BodyRead { len: 0, eof: false });
                }
                let n = conn.read(buf).await?;
                Ok(BodyRead { len: n, eof: n == 0 })
            }
        }
    }

    /// Read the rest of the body into `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, HttpError> {
        let mut buf = [0u8; 4096];
        let start = out.len();
        loop {
            let r = self.read(&mut buf).await?;
            out.extend_from_slice(&buf[..r.len]);
            if r.eof {
                return Ok(out.len() - start);
            }
        }
    }

    /// Close the underlying connection without draining the body.
    pub async fn close(self) -> Result<(), HttpError> {
        match self {
            Body::Chunked(rd) => rd.close().await,
            Body::UntilClose(conn) => conn.close().await,
        }
    }
}

/// A response whose header block has been read.
pub struct Response<S> {
    pub proto: String,
    pub status: String,
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Body<S>,
}

/// Read status line and headers from `conn` and pick the body framing.
pub async fn read_response<S: AsyncRead + AsyncWrite + Unpin>(
    mut conn: ConnCloser<S>,
) -> Result<Response<S>, HttpError> {
    let line = conn.read_line().await?;
    let status = parse_status_line(&line)?;
    let headers = read_headers(&mut conn).await?;

    let body = if is_chunked(&headers) {
        Body::Chunked(ChunkedReader::new(conn))
    } else {
        Body::UntilClose(conn)
    };

    Ok(Response {
        proto: status.proto,
        status: status.status,
        status_code: status.code,
        headers,
        body,
    })
}

/// Read `Name: value` lines up to the blank line ending the block.
///
/// Lines starting with SP or HT continue the previous header's value.
async fn read_headers<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut ConnCloser<S>,
) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    let mut pending: Option<(HeaderName, String)> = None;

    loop {
        let line = conn.read_line().await?;
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            match pending.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => return Err(HttpError::MalformedHeader(line)),
            }
        }

        if let Some((name, value)) = pending.take() {
            append_header(&mut headers, name, &value)?;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::MalformedHeader(line.clone()))?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::MalformedHeader(line.clone()))?;
        pending = Some((name, value.trim().to_string()));
    }

    if let Some((name, value)) = pending {
        append_header(&mut headers, name, &value)?;
    }
    Ok(headers)
}

fn append_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), HttpError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| HttpError::MalformedHeader(format!("{}: {}", name, value)))?;
    headers.append(name, value);
    Ok(())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::conn::wire;

    #[test]
    fn test_parse_status_line() {
        let s = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(s.proto, "HTTP/1.1");
        assert_eq!(s.code, 200);
        assert_eq!(s.status, "200 OK");

        let s = parse_status_line("HTTP/1.0 404 Not Found").unwrap();
        assert_eq!(s.code, 404);
        assert_eq!(s.status, "404 Not Found");

        // Reason phrase is optional.
        assert_eq!(parse_status_line("HTTP/1.1 204").unwrap().code, 204);
    }

    #[test]
    fn test_parse_status_line_rejects_bad_codes() {
        for line in [
            "HTTP/1.1 20 OK",
            "HTTP/1.1 2000 OK",
            "HTTP/1.1 abc OK",
            "HTTP/1.1 -20 OK",
            "HTTP/1.1 +20 OK",
            "HTTP/1.1  200 OK",
        ] {
            assert!(
                matches!(parse_status_line(line), Err(HttpError::MalformedStatusCode(_))),
                "line {:?}",
                line
            );
        }

        assert!(matches!(
            parse_status_line("HTTP/1.1"),
            Err(HttpError::MalformedStatusLine(_))
        ));
    }

    #[tokio::test]
    async fn test_chunked_response() {
        let conn = wire(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: text/plain\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n\
              4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        )
        .await;

        let mut resp = read_response(conn).await.unwrap();
        assert_eq!(resp.proto, "HTTP/1.1");
        assert_eq!(resp.status_code, 200);
        assert!(resp.body.is_chunked());
        assert_eq!(resp.headers["content-type"], "text/plain");

        let mut body = Vec::new();
        resp.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"Wikipedia");
    }

    #[tokio::test]
    async fn test_chunked_token_in_list() {
        let conn = wire(
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: gzip, Chunked\r\n\r\n0\r\n\r\n",
        )
        .await;
        let resp = read_response(conn).await.unwrap();
        assert!(resp.body.is_chunked());
    }

    #[tokio::test]
    async fn test_plain_body_is_rest_of_connection() {
        let rest = b"not chunked\r\n0\r\nHTTP/1.1 200 OK\r\n";
        let mut bytes = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n".to_vec();
        bytes.extend_from_slice(rest);

        let mut resp = read_response(wire(&bytes).await).await.unwrap();
        assert!(!resp.body.is_chunked());

        let mut body = Vec::new();
        resp.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, rest);
    }

    #[tokio::test]
    async fn test_header_block() {
        let conn = wire(
            b"HTTP/1.1 301 Moved Permanently\r\n\
              Set-Cookie: a=1\r\n\
              set-cookie: b=2\r\n\
              X-Folded: first\r\n\
              \t  second\r\n\
              Location:https://example.com/\r\n\
              \r\n",
        )
        .await;

        let resp = read_response(conn).await.unwrap();
        assert_eq!(resp.status_code, 301);
        let cookies: Vec<_> = resp.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        assert_eq!(resp.headers["x-folded"], "first second");
        assert_eq!(resp.headers["location"], "https://example.com/");
    }

    #[tokio::test]
    async fn test_unexpected_eof() {
        let empty = read_response(wire(b"").await).await;
        assert!(matches!(empty, Err(HttpError::UnexpectedEof)));

        let cut = read_response(wire(b"HTTP/1.1 200 OK\r\nServer: x\r\n").await).await;
        assert!(matches!(cut, Err(HttpError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_malformed_headers() {
        let no_colon = read_response(wire(b"HTTP/1.1 200 OK\r\nbogus\r\n\r\n").await).await;
        assert!(matches!(no_colon, Err(HttpError::MalformedHeader(_))));

        let leading_fold =
            read_response(wire(b"HTTP/1.1 200 OK\r\n folded\r\n\r\n").await).await;
        assert!(matches!(leading_fold, Err(HttpError::MalformedHeader(_))));

        let bad_name =
            read_response(wire(b"HTTP/1.1 200 OK\r\nbad name: x\r\n\r\n").await).await;
        assert!(matches!(bad_name, Err(HttpError::MalformedHeader(_))));
    }
}
