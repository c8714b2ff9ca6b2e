//! Outbound connections, optionally tunnelled through an upstream proxy

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::TransportError;
use crate::models::{ProxyEndpoint, ProxyProtocol};

/// Open a TCP stream to `host:port`, through `proxy` when given
///
/// The whole setup, proxy handshake included, is bounded by `connect_timeout`.
/// A timeout is reported the way curl reports it, since the retry logic keys
/// off that wording.
pub async fn connect(
    proxy: Option<&ProxyEndpoint>,
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream, TransportError> {
    let establish = establish(proxy, host, port);

    match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, establish).await.map_err(|_| {
            TransportError::connect(format!(
                "Connection timed out after {} milliseconds with 0 out of 0 bytes received",
                limit.as_millis()
            ))
        })?,
        None => establish.await,
    }
}

async fn establish(
    proxy: Option<&ProxyEndpoint>,
    host: &str,
    port: u16,
) -> Result<TcpStream, TransportError> {
    let direct_addr = format_tcp_addr(host, port);

    let Some(proxy) = proxy else {
        return TcpStream::connect(&direct_addr).await.map_err(|e| {
            TransportError::connect(format!("Failed to connect to {}: {}", direct_addr, e))
        });
    };

    let socket = connect_to_proxy(proxy).await?;

    match proxy.protocol {
        ProxyProtocol::Http | ProxyProtocol::Https => {
            connect_via_http_proxy(socket, proxy, host, port).await
        }
        ProxyProtocol::Socks5 => connect_via_socks5_proxy(socket, proxy, host, port).await,
    }
}

async fn connect_to_proxy(proxy: &ProxyEndpoint) -> Result<TcpStream, TransportError> {
    let (proxy_host, proxy_port) = proxy
        .host_port()
        .map_err(|e| TransportError::protocol(e.to_string()))?;

    let addrs: Vec<std::net::SocketAddr> =
        match tokio::net::lookup_host((proxy_host.as_str(), proxy_port)).await {
            Ok(addrs) => addrs.collect(),
            Err(_) => Vec::new(),
        };
    if addrs.is_empty() {
        return Err(TransportError::protocol(format!(
            "Could not resolve proxy: {}",
            proxy_host
        )));
    }

    debug!("Connecting to {} proxy at {}", proxy.protocol, proxy.address);
    TcpStream::connect(addrs.as_slice()).await.map_err(|e| {
        TransportError::connect(format!(
            "Failed to connect to proxy {}: {}",
            proxy.address, e
        ))
    })
}

async fn connect_via_http_proxy(
    mut stream: TcpStream,
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, TransportError> {
    stream
        .write_all(build_connect_request(proxy, target_host, target_port).as_bytes())
        .await
        .map_err(|e| TransportError::connect(format!("Failed to send CONNECT: {}", e)))?;

    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await.map_err(|e| {
        TransportError::connect(format!("Failed to read CONNECT response: {}", e))
    })?;
    if n == 0 {
        return Err(TransportError::protocol("Proxy closed the connection during CONNECT"));
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    let status_line = response_str.lines().next().unwrap_or_default();
    match parse_status_code(status_line) {
        Some(200) => {
            debug!("HTTP CONNECT tunnel established");
            Ok(stream)
        }
        Some(code) => Err(TransportError::protocol(format!(
            "Received HTTP code {} from proxy after CONNECT",
            code
        ))),
        None => Err(TransportError::protocol(format!(
            "Malformed CONNECT response: {}",
            status_line
        ))),
    }
}

async fn connect_via_socks5_proxy(
    socket: TcpStream,
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, TransportError> {
    let stream = match (&proxy.username, &proxy.password) {
        (Some(username), Some(password)) if proxy.has_credentials() => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                username,
                password,
            )
            .await
        }
        _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await,
    }
    .map_err(|e| TransportError::connect(format!("SOCKS5 proxy {} failed: {}", proxy.address, e)))?;

    debug!("SOCKS5 connection established");
    Ok(stream.into_inner())
}

/// Build HTTP CONNECT request
fn build_connect_request(proxy: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
    let authority = format_tcp_addr(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
        if proxy.has_credentials() {
            let credentials = format!("{}:{}", username, password);
            request.push_str(&format!(
                "Proxy-Authorization: Basic {}\r\n",
                BASE64.encode(credentials.as_bytes())
            ));
        }
    }

    request.push_str("\r\n");
    request
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn spawn_echo_target() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });
        (addr, task)
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code("HTTP/1.1 200 Connection Established"), Some(200));
        assert_eq!(parse_status_code("HTTP/1.0 407 Proxy Authentication Required"), Some(407));
        assert_eq!(parse_status_code("SSH-2.0-OpenSSH"), None);
        assert_eq!(parse_status_code(""), None);
    }

    #[test]
    fn test_build_connect_request_with_credentials() {
        let proxy = ProxyEndpoint::new("proxy:3128").with_credentials("user", "pass");
        let request = build_connect_request(&proxy, "example.com", 80);

        assert!(request.starts_with("CONNECT example.com:80 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_connect_request_without_credentials() {
        let proxy = ProxyEndpoint::new("proxy:3128").with_credentials("user", "");
        let request = build_connect_request(&proxy, "::1", 8080);

        assert!(request.starts_with("CONNECT [::1]:8080 HTTP/1.1\r\n"));
        assert!(!request.contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn test_connect_direct_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(None, "127.0.0.1", port, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_connect_via_http_proxy_tunnels_bytes() {
        let (target_addr, target_task) = spawn_echo_target().await;

        // Minimal HTTP CONNECT forward proxy.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();

            let mut buf = vec![0u8; 2048];
            let n = client.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);

            assert!(req.starts_with("CONNECT 127.0.0.1:"));
            assert!(req.contains("Proxy-Authorization: Basic "));

            let mut server = TcpStream::connect(target_addr).await.unwrap();
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let proxy = ProxyEndpoint::new(proxy_addr.to_string()).with_credentials("user", "pass");

        let mut stream = connect(Some(&proxy), "127.0.0.1", target_addr.port(), None)
            .await
            .unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut out = [0u8; 4];
        timeout(Duration::from_secs(1), stream.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&out, b"ping");

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_via_http_proxy_auth_rejected() {
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let _ = client.read(&mut buf).await.unwrap();
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = ProxyEndpoint::new(proxy_addr.to_string());
        let err = connect(Some(&proxy), "example.com", 80, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransportError::protocol("Received HTTP code 407 from proxy after CONNECT")
        );
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_times_out_with_zero_bytes_message() {
        // Accepts the TCP connection but never answers the CONNECT.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (client, _) = proxy_listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(client);
        });

        let proxy = ProxyEndpoint::new(proxy_addr.to_string());
        let err = connect(Some(&proxy), "example.com", 80, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        match err {
            TransportError::Connect { message } => {
                assert!(message.contains("0 out of 0 bytes received"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_via_socks5_proxy_tunnels_bytes() {
        let (target_addr, target_task) = spawn_echo_target().await;

        // Minimal SOCKS5 forward proxy with username/password auth.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();

            // Greeting: VER, NMETHODS, METHODS...
            let mut header = [0u8; 2];
            client.read_exact(&mut header).await.unwrap();
            assert_eq!(header[0], 0x05);
            let mut methods = vec![0u8; header[1] as usize];
            client.read_exact(&mut methods).await.unwrap();
            assert!(methods.contains(&0x02));

            client.write_all(&[0x05, 0x02]).await.unwrap();

            // Username/password auth request.
            let mut auth_head = [0u8; 2];
            client.read_exact(&mut auth_head).await.unwrap();
            assert_eq!(auth_head[0], 0x01);
            let mut uname = vec![0u8; auth_head[1] as usize];
            client.read_exact(&mut uname).await.unwrap();
            let mut plen = [0u8; 1];
            client.read_exact(&mut plen).await.unwrap();
            let mut passwd = vec![0u8; plen[0] as usize];
            client.read_exact(&mut passwd).await.unwrap();

            assert_eq!(std::str::from_utf8(&uname).unwrap(), "user");
            assert_eq!(std::str::from_utf8(&passwd).unwrap(), "pass");

            client.write_all(&[0x01, 0x00]).await.unwrap();

            // CONNECT request.
            let mut req_head = [0u8; 4];
            client.read_exact(&mut req_head).await.unwrap();
            assert_eq!(req_head[0], 0x05); // VER
            assert_eq!(req_head[1], 0x01); // CMD=CONNECT
            assert_eq!(req_head[3], 0x01); // ATYP=IPv4

            let mut dst_ip = [0u8; 4];
            client.read_exact(&mut dst_ip).await.unwrap();
            let mut dst_port = [0u8; 2];
            client.read_exact(&mut dst_port).await.unwrap();

            let dest = std::net::SocketAddr::from((
                std::net::Ipv4Addr::from(dst_ip),
                u16::from_be_bytes(dst_port),
            ));
            assert_eq!(dest, target_addr);

            let mut server = TcpStream::connect(dest).await.unwrap();
            client
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let mut relay_buf = [0u8; 64];
            let n = client.read(&mut relay_buf).await.unwrap();
            server.write_all(&relay_buf[..n]).await.unwrap();
            let n = server.read(&mut relay_buf).await.unwrap();
            client.write_all(&relay_buf[..n]).await.unwrap();
        });

        let proxy = ProxyEndpoint::new(proxy_addr.to_string())
            .with_protocol(ProxyProtocol::Socks5)
            .with_credentials("user", "pass");

        let mut stream = connect(Some(&proxy), "127.0.0.1", target_addr.port(), None)
            .await
            .unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut out = [0u8; 4];
        timeout(Duration::from_secs(1), stream.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&out, b"ping");

        proxy_task.await.unwrap();
        target_task.await.unwrap();
    }
}
