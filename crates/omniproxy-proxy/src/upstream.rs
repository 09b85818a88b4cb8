//! Parent-proxy dialing.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ProxyError, Result};

/// An upstream (parent) HTTP proxy.
///
/// Plain requests are sent to it in absolute form; tunneled and MITM
/// traffic reaches the origin through an HTTP `CONNECT` on this proxy.
#[derive(Debug, Clone)]
pub struct Upstream {
    host: String,
    port: u16,
}

impl Upstream {
    /// Parses an upstream URL of the form `http://host[:port]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix("http://")
            .ok_or_else(|| ProxyError::Config(format!("unsupported upstream url: {raw}")))?;
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(ProxyError::Config(format!("upstream url has no host: {raw}")));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ProxyError::Config(format!("bad upstream port in {raw}")))?;
                (host.to_string(), port)
            }
            None => (rest.to_string(), 80),
        };

        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opens a TCP connection to the upstream proxy itself.
    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect((self.host.as_str(), self.port)).await?)
    }

    /// Establishes an opaque tunnel to `target_host:target_port` through the
    /// upstream via HTTP CONNECT and returns the stream positioned after
    /// the proxy's 200 response.
    pub async fn connect_tunnel(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let mut stream = self.connect().await?;

        let request = format!(
            "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await?;

        // Read the response head; it must be a 200 with no body.
        let mut buf = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            if buf.len() > 8192 {
                return Err(ProxyError::Upstream(
                    "oversized CONNECT response from upstream proxy".to_string(),
                ));
            }
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Err(ProxyError::Upstream(
                    "upstream proxy closed during CONNECT".to_string(),
                ));
            }
            buf.push(byte[0]);
        }

        let head = String::from_utf8_lossy(&buf);
        let status_line = head.lines().next().unwrap_or("");
        let ok = status_line
            .split_whitespace()
            .nth(1)
            .map(|code| code.starts_with('2'))
            .unwrap_or(false);

        if !ok {
            return Err(ProxyError::Upstream(format!(
                "upstream proxy refused CONNECT: {status_line}"
            )));
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn parse_with_port() {
        let up = Upstream::parse("http://proxy.corp:3128").unwrap();
        assert_eq!(up.host(), "proxy.corp");
        assert_eq!(up.port(), 3128);
    }

    #[test]
    fn parse_default_port() {
        let up = Upstream::parse("http://proxy.corp").unwrap();
        assert_eq!(up.port(), 80);
    }

    #[test]
    fn parse_trailing_slash() {
        let up = Upstream::parse("http://proxy.corp:8080/").unwrap();
        assert_eq!(up.port(), 8080);
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert!(Upstream::parse("socks5://proxy:1080").is_err());
        assert!(Upstream::parse("proxy:8080").is_err());
        assert!(Upstream::parse("http://").is_err());
    }

    #[tokio::test]
    async fn connect_tunnel_happy_path() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(head.starts_with("CONNECT target.test:443 HTTP/1.1"));
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
        });

        let up = Upstream::parse(&format!("http://127.0.0.1:{}", addr.port())).unwrap();
        let stream = up.connect_tunnel("target.test", 443).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn connect_tunnel_refused() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let up = Upstream::parse(&format!("http://127.0.0.1:{}", addr.port())).unwrap();
        assert!(up.connect_tunnel("target.test", 443).await.is_err());
    }
}
