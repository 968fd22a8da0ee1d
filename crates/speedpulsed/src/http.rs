//! Just enough HTTP/1.1 for the daemon's four endpoints.
//!
//! Every connection serves one request and is closed afterwards. Request
//! bodies are never read.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEAD_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

impl Request {
    /// Value of `key` in the query string, undecoded.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Read a request head. `Ok(None)` when the peer closed before sending one.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut tmp = [0u8; 1024];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }

    let head = String::from_utf8_lossy(&buf);
    parse_request_line(&head)
        .map(Some)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed request line"))
}

fn parse_request_line(head: &str) -> Option<Request> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    let target = parts.next()?;
    if !parts.next()?.starts_with("HTTP/1.") {
        return None;
    }
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    Some(Request {
        method,
        path: path.to_string(),
        query,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

pub async fn write_json<W>(writer: &mut W, status: u16, value: &serde_json::Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_response(writer, status, "application/json", &body).await
}

/// Head of an open-ended `text/event-stream` response.
pub async fn write_sse_head<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        )
        .await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line_with_query() {
        let req = parse_request_line("get /results?limit=5 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/results");
        assert_eq!(req.query_param("limit"), Some("5"));
        assert_eq!(req.query_param("other"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_request_line("hello\r\n\r\n").is_none());
        assert!(parse_request_line("GET / SPDY/3\r\n\r\n").is_none());
    }

    #[test]
    fn test_query_flag_without_value() {
        let req = parse_request_line("GET /x?verbose&limit=2 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.query_param("verbose"), Some(""));
        assert_eq!(req.query_param("limit"), Some("2"));
    }

    #[tokio::test]
    async fn test_read_request_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(b"POST /run HT").await.unwrap();
            client.write_all(b"TP/1.1\r\nContent-Length: 0\r\n\r\n").await.unwrap();
            client
        });

        let req = read_request(&mut server).await.unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/run");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection_yields_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_request(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_response_sets_length() {
        let mut out: Vec<u8> = Vec::new();
        write_response(&mut out, 409, "application/json", b"{}").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 409 Conflict\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }
}
