//! HTTP proxy configuration and CONNECT tunnelling.
//!
//! Credentials are attached to each connection attempt; nothing is
//! registered process-wide.

use crate::error::{ConnectionFailure, Result, TransportError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;
const MAX_CONNECT_HEADERS: usize = 32;

/// Proxy host, port and optional credentials.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
}

impl ProxyConfig {
    /// Proxy without authentication.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Authenticate with basic credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into().into_boxed_str()));
        self
    }

    /// Proxy host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// `http://host:port`
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Value of the `Proxy-Authorization` header, if credentials are set.
    pub fn authorization(&self) -> Option<String> {
        let username = self.username.as_deref()?;
        let password = self.password.as_ref().map(|p| p.expose_secret()).unwrap_or("");
        Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        ))
    }

    /// Proxy for the sequential transport's reqwest client.
    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url())
            .map_err(|e| TransportError::InvalidConfig(format!("invalid proxy: {e}")))?;
        Ok(match &self.username {
            Some(username) => proxy.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret()).unwrap_or(""),
            ),
            None => proxy,
        })
    }

    /// Open a TCP connection to the proxy and tunnel it to `host:port`.
    ///
    /// `connect_timeout` bounds the TCP connect, `socket_timeout` bounds
    /// reading the proxy's reply.
    pub(crate) async fn connect_tunnel(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<TcpStream> {
        let mut stream = connect_tcp(&self.host, self.port, connect_timeout).await?;

        let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
        if let Some(authorization) = self.authorization() {
            request.push_str(&format!("Proxy-Authorization: {authorization}\r\n"));
        }
        request.push_str("\r\n");

        debug!(proxy = %self.url(), target = %format!("{host}:{port}"), "Opening proxy tunnel");
        stream.write_all(request.as_bytes()).await?;

        let status = tokio::time::timeout(socket_timeout, read_connect_status(&mut stream))
            .await
            .map_err(|_| {
                TransportError::connection(
                    ConnectionFailure::ReadTimeout,
                    1,
                    format!("proxy did not answer CONNECT within {socket_timeout:?}"),
                )
            })??;

        if status == 200 {
            Ok(stream)
        } else {
            Err(TransportError::connection(
                ConnectionFailure::Io,
                1,
                format!("proxy refused CONNECT with status {status}"),
            ))
        }
    }
}

/// TCP connect bounded by `timeout`; running out of time is a
/// connect-phase timeout.
pub(crate) async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(TransportError::connection(ConnectionFailure::Io, 1, e.to_string())),
        Err(_) => Err(TransportError::connection(
            ConnectionFailure::ConnectTimeout,
            1,
            format!("connect to {host}:{port} timed out after {timeout:?}"),
        )),
    }
}

/// Read the proxy's reply to CONNECT and return its status code.
async fn read_connect_status(stream: &mut TcpStream) -> Result<u16> {
    let mut buf = BytesMut::with_capacity(512);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::connection(
                ConnectionFailure::Io,
                1,
                "proxy closed the connection during CONNECT",
            ));
        }

        match parse_connect_response(&buf)? {
            Some((status, head_len)) => {
                // The tunnel carries nothing until the TLS handshake starts.
                if buf.len() > head_len {
                    return Err(TransportError::Protocol(
                        "proxy sent data after its CONNECT response".into(),
                    ));
                }
                return Ok(status);
            }
            None if buf.len() > MAX_CONNECT_RESPONSE => {
                return Err(TransportError::connection(
                    ConnectionFailure::Io,
                    1,
                    "proxy CONNECT response too large",
                ));
            }
            None => {}
        }
    }
}

/// Parse a CONNECT response head. `Ok(None)` means more bytes are needed.
fn parse_connect_response(buf: &[u8]) -> Result<Option<(u16, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_CONNECT_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let status = response.code.ok_or_else(malformed_response)?;
            Ok(Some((status, head_len)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(TransportError::connection(
            ConnectionFailure::Io,
            1,
            format!("malformed proxy CONNECT response: {e}"),
        )),
    }
}

fn malformed_response() -> TransportError {
    TransportError::connection(ConnectionFailure::Io, 1, "malformed proxy CONNECT response")
}
