//! Bodiless HTTP/1.1 request serialization.

use http::{HeaderMap, HeaderValue, Method};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A request without a body, written in one go on a fresh connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-form request target, e.g. `/`.
    pub target: String,
    /// Value for the mandatory `Host` header.
    pub host: String,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, target: &str, host: &str) -> Self {
        Self {
            method,
            target: target.to_string(),
            host: host.to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// The probe request: `HEAD /` with `Connection: close`.
    pub fn probe(host: &str) -> Self {
        let mut req = Self::new(Method::HEAD, "/", host);
        req.headers
            .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        req
    }

    /// Serialize the request line and header block.
    ///
    /// `Host` always comes first; an explicit `Host` in `headers` overrides
    /// the request's host.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", self.method, self.target).as_bytes(),
        );

        out.extend_from_slice(b"Host: ");
        match self.headers.get(http::header::HOST) {
            Some(v) => out.extend_from_slice(v.as_bytes()),
            None => out.extend_from_slice(self.host.as_bytes()),
        }
        out.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            if *name == http::header::HOST {
                continue;
            }
            out.extend_from_slice(canonical_name(name.as_str()).as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out
    }

    /// Write the request and flush it.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_bytes()).await?;
        w.flush().await
    }
}

/// `content-length` -> `Content-Length`.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("connection"), "Connection");
        assert_eq!(canonical_name("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonical_name("user-agent"), "User-Agent");
    }

    #[tokio::test]
    async fn test_probe_request_on_the_wire() {
        let req = Request::probe("example.com");
        let mut mock = tokio_test::io::Builder::new()
            .write(b"HEAD / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n")
            .build();
        req.write_to(&mut mock).await.unwrap();
    }

    #[test]
    fn test_explicit_host_header_wins() {
        let mut req = Request::new(Method::GET, "/status", "10.0.0.1");
        req.headers
            .insert(http::header::HOST, HeaderValue::from_static("example.org:8443"));
        let text = String::from_utf8(req.to_bytes()).unwrap();
        assert_eq!(text, "GET /status HTTP/1.1\r\nHost: example.org:8443\r\n\r\n");
    }
}
