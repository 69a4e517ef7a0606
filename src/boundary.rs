//! Helpers used by the out-of-core transport: HTTP redirect/stub
//! forgery and a non-validating TLS redial with optional SNI fronting.
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::inspect::get_host;

const DEADLINE: Duration = Duration::from_secs(5);

/// `HttpMove`: synthesize an HTTP response redirecting (or stubbing)
/// the client's request, rather than forwarding it. `buf` is the
/// original client request, used only to recover its request path.
///
/// - empty `host` → `200 OK` stub.
/// - `host == "https"` → `302 Found` to `https://<original Host><path>`.
/// - otherwise → `302 Found` to `<host><path>`.
///
/// Returns `false` without writing on any parsing failure.
pub async fn http_move(conn: &mut TcpStream, host: &str, buf: &[u8]) -> Result<bool> {
    let Some(path) = request_path(buf) else {
        return Ok(false);
    };

    let body = if host.is_empty() {
        http_200_stub()
    } else if host == "https" {
        let (off, len) = get_host(buf);
        if (off, len) == (0, 0) {
            return Ok(false);
        }
        let Ok(original_host) = std::str::from_utf8(&buf[off..off + len]) else {
            return Ok(false);
        };
        http_302(&format!("https://{original_host}{path}"))
    } else {
        http_302(&format!("{host}{path}"))
    };

    timeout(DEADLINE, conn.write_all(body.as_bytes()))
        .await
        .map_err(|_| Error::resolve("http_move write timed out"))??;
    Ok(true)
}

fn request_path(buf: &[u8]) -> Option<&str> {
    let line_end = buf.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let line = std::str::from_utf8(&buf[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    parts.next()?; // method
    parts.next()
}

fn http_200_stub() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n{}",
        common_headers(0)
    )
}

fn http_302(location: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {location}\r\n{}",
        common_headers(0)
    )
}

fn common_headers(content_length: usize) -> String {
    format!(
        "Cache-Control: private\r\nServer: pinocchio\r\nContent-Length: {content_length}\r\n\r\n"
    )
}

/// `DialStrip`: open a non-validating TLS connection to `host:443`,
/// optionally presenting `fronting` as the SNI instead of `host` — used
/// for domain-fronted redials.
pub async fn dial_strip(
    host: &str,
    fronting: Option<&str>,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let addr = format!("{host}:443");
    let tcp = timeout(DEADLINE, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::resolve("dial_strip connect timed out"))??;

    let sni_host = fronting.unwrap_or(host);
    let server_name = rustls::ServerName::try_from(sni_host)
        .map_err(|e| Error::resolve(format!("invalid TLS server name: {e}")))?;

    let connector = crate::insecure_tls::connector();
    let stream = timeout(DEADLINE, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::resolve("dial_strip handshake timed out"))??;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_extracts_target() {
        let buf = b"GET /foo/bar?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(request_path(buf), Some("/foo/bar?x=1"));
    }

    #[test]
    fn request_path_none_on_empty_line() {
        assert_eq!(request_path(b""), None);
    }

    #[test]
    fn http_200_stub_has_zero_length_and_headers() {
        let body = http_200_stub();
        assert!(body.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(body.contains("Content-Length: 0\r\n"));
        assert!(body.contains("Server: pinocchio"));
        assert!(body.contains("Cache-Control: private"));
    }

    #[test]
    fn http_302_redirects_to_location() {
        let body = http_302("https://example.com/path");
        assert!(body.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(body.contains("Location: https://example.com/path\r\n"));
    }
}
