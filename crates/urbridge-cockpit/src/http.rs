//! Minimal HTTP/1.1 plumbing: read one request, write one JSON response.
//!
//! Every connection carries a single request and is closed after the
//! response (`Connection: close`).

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use urbridge_types::BridgeError;

const MAX_HEAD: usize = 16 * 1024;
const MAX_BODY: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[cfg(test)]
    pub fn new(method: &str, path: &str, body: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }
}

/// Read a request head and its `Content-Length` body from `stream`.
pub(crate) async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<HttpRequest, BridgeError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let (method, path, head_len, content_length) = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| BridgeError::Transport(format!("read error: {e}")))?;
        if n == 0 {
            return Err(BridgeError::Transport("connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.unwrap_or_default().to_string();
                let target = req.path.unwrap_or("/");
                let path = target.split('?').next().unwrap_or(target).to_string();
                let content_length = content_length(req.headers)?;
                break (method, path, head_len, content_length);
            }
            Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD => {
                return Err(BridgeError::Transport("request head too large".into()));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(BridgeError::Transport(format!("malformed request: {e}"))),
        }
    };

    if content_length > MAX_BODY {
        return Err(BridgeError::Transport(format!(
            "request body of {content_length} bytes exceeds {MAX_BODY}"
        )));
    }
    let mut body = buf.split_off(head_len);
    while body.len() < content_length {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| BridgeError::Transport(format!("read error: {e}")))?;
        if n == 0 {
            return Err(BridgeError::Transport("connection closed mid-body".into()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, body })
}

fn content_length(headers: &[httparse::Header<'_>]) -> Result<usize, BridgeError> {
    let Some(header) = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(0);
    };
    std::str::from_utf8(header.value)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| BridgeError::Transport("invalid Content-Length".into()))
}

/// A response with an optional JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                body: Some(body),
            },
            Err(e) => Self::error(500, &format!("response serialization failed: {e}")),
        }
    }

    /// `{"status": status_word, "message": message}`.
    pub fn status(status: u16, status_word: &str, message: &str) -> Self {
        Self::json(
            status,
            &serde_json::json!({ "status": status_word, "message": message }),
        )
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::status(status, "error", message)
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.as_deref().unwrap_or("");
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Connection: close\r\n",
            self.status,
            reason(self.status)
        );
        if self.body.is_some() {
            out.push_str("Content-Type: application/json\r\n");
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        out.push_str(body);
        out.into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_request_with_body() {
        let raw = b"POST /set-digital-output?x=1 HTTP/1.1\r\nHost: robot\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"value\": 1}\n";
        let req = read_request(&mut &raw[..]).await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/set-digital-output");
        assert_eq!(req.body, b"{\"value\": 1}\n");
    }

    #[tokio::test]
    async fn request_without_body() {
        let raw = b"GET /state HTTP/1.1\r\nHost: robot\r\n\r\n";
        let req = read_request(&mut &raw[..]).await.unwrap();
        assert_eq!(req, HttpRequest::new("GET", "/state", ""));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let raw = b"POST /start HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            read_request(&mut &raw[..]).await,
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let raw = b"\x00\x01\x02 not http\r\n\r\n";
        assert!(read_request(&mut &raw[..]).await.is_err());
    }

    #[tokio::test]
    async fn bad_content_length_is_rejected() {
        let raw = b"POST /start HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(read_request(&mut &raw[..]).await.is_err());
    }

    #[test]
    fn json_response_carries_cors_and_length() {
        let resp = HttpResponse::status(200, "started", "Monitoring started");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        let body = resp.body.unwrap();
        assert!(text.ends_with(&body));
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn no_content_has_empty_body() {
        let text = String::from_utf8(HttpResponse::no_content().to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
        assert!(!text.contains("Content-Type"));
    }
}
