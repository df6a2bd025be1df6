//! The shared multiplexed connection.
//!
//! [`H2Connector`] opens TCP (optionally through a CONNECT proxy), TLS with
//! ALPN `h2`, and the HTTP/2 handshake. Two tasks are spawned per
//! connection: one drives the h2 connection itself, the other is the event
//! loop that owns the request sender, writes requests in dispatch order and
//! completes each stream's [`StreamEntry`].

use super::table::{StreamCompleter, StreamEntry};
use crate::config::TransportConfig;
use crate::error::{ConnectionFailure, Result, TransportError};
use crate::proxy::{ProxyConfig, connect_tcp};
use crate::request::HttpRequestSpec;
use crate::response::RawResponse;
use crate::tls::{self, ALPN_H2, TrustPolicy};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use h2::client::{ResponseFuture, SendRequest};
use h2::{Ping, PingPong};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use url::Url;

/// Opens shared connections.
#[async_trait]
pub trait MuxConnector: Send + Sync {
    /// Establish a new connection. The settings handshake is awaited
    /// separately through [`MuxConnection::ready`].
    async fn connect(&self) -> Result<Box<dyn MuxConnection>>;
}

/// One shared duplex connection carrying many streams.
#[async_trait]
pub trait MuxConnection: Send + Sync {
    /// Resolve once the peer's connection settings have been received.
    async fn ready(&mut self) -> Result<()>;

    /// Hand `request` to the connection under the logical `stream_id`.
    ///
    /// Requests are written in the order they are dispatched. The returned
    /// entry completes when the write and the response finish.
    fn dispatch(&mut self, stream_id: u32, request: &HttpRequestSpec) -> Result<StreamEntry>;

    /// Whether the connection can still carry new streams.
    fn is_open(&self) -> bool;

    /// Close the connection and abandon anything in flight.
    async fn close(&mut self);
}

/// [`MuxConnector`] speaking HTTP/2 over TLS.
#[derive(Clone)]
pub struct H2Connector {
    scheme: String,
    host: String,
    port: u16,
    tls: TlsConnector,
    proxy: Option<ProxyConfig>,
    connection_timeout: Duration,
    socket_timeout: Duration,
}

impl H2Connector {
    /// Build a connector for the host of `base_url`, which must be `https`.
    pub fn new(
        base_url: &Url,
        config: &TransportConfig,
        trust: &TrustPolicy,
        proxy: Option<ProxyConfig>,
    ) -> Result<Self> {
        if base_url.scheme() != "https" {
            return Err(TransportError::InvalidUrl(format!(
                "multiplexed transport requires https, got {base_url}"
            )));
        }
        let host = base_url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("missing host in {base_url}")))?
            .to_string();
        let port = base_url.port_or_known_default().unwrap_or(443);

        let tls_config = tls::client_config(trust, &config.ssl_version, &[ALPN_H2])?;

        Ok(Self {
            scheme: base_url.scheme().to_string(),
            host,
            port,
            tls: TlsConnector::from(Arc::new(tls_config)),
            proxy,
            connection_timeout: config.connection_timeout,
            socket_timeout: config.socket_timeout,
        })
    }
}

#[async_trait]
impl MuxConnector for H2Connector {
    async fn connect(&self) -> Result<Box<dyn MuxConnection>> {
        let tcp = match &self.proxy {
            Some(proxy) => {
                proxy
                    .connect_tunnel(
                        &self.host,
                        self.port,
                        self.connection_timeout,
                        self.socket_timeout,
                    )
                    .await?
            }
            None => connect_tcp(&self.host, self.port, self.connection_timeout).await?,
        };

        let server_name = tls::server_name(&self.host)?;
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        check_alpn(tls.get_ref().1.alpn_protocol(), &self.host)?;

        let connection = H2Connection::handshake(tls, &self.scheme, &self.host, self.port).await?;
        debug!(host = %self.host, port = self.port, proxied = self.proxy.is_some(), "Connected");
        Ok(Box::new(connection))
    }
}

fn check_alpn(negotiated: Option<&[u8]>, host: &str) -> Result<()> {
    if negotiated == Some(ALPN_H2) {
        Ok(())
    } else {
        Err(TransportError::Protocol(format!("{host} did not negotiate h2")))
    }
}

struct Outbound {
    stream_id: u32,
    request: http::Request<()>,
    body: Option<Bytes>,
    completer: StreamCompleter,
}

/// HTTP/2 [`MuxConnection`] created by [`H2Connector`].
pub struct H2Connection {
    authority: String,
    scheme: String,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    ping_pong: Option<PingPong>,
    open: Arc<AtomicBool>,
    driver: JoinHandle<()>,
    event_loop: JoinHandle<()>,
}

impl H2Connection {
    /// Run the HTTP/2 handshake over an established stream and spawn the
    /// connection driver and event loop.
    async fn handshake<T>(io: T, scheme: &str, host: &str, port: u16) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (send_request, mut connection) = h2::client::handshake(io).await?;
        let ping_pong = connection.ping_pong();

        let open = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn({
            let open = Arc::clone(&open);
            let host = host.to_string();
            async move {
                if let Err(e) = connection.await {
                    debug!(host = %host, "HTTP/2 connection ended: {e}");
                }
                open.store(false, Ordering::SeqCst);
            }
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let event_loop = tokio::spawn(event_loop(send_request, outbound_rx));

        Ok(Self {
            authority: format!("{host}:{port}"),
            scheme: scheme.to_string(),
            outbound: Some(outbound_tx),
            ping_pong,
            open,
            driver,
            event_loop,
        })
    }

    fn to_http_request(&self, request: &HttpRequestSpec) -> Result<http::Request<()>> {
        let uri = format!("{}://{}{}", self.scheme, self.authority, request.path_and_query());
        let mut builder = http::Request::builder()
            .method(request.method().clone())
            .uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers().clone());
        }
        builder
            .body(())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl MuxConnection for H2Connection {
    async fn ready(&mut self) -> Result<()> {
        // The server's SETTINGS frame precedes any PONG it sends.
        let ping_pong = self
            .ping_pong
            .as_mut()
            .ok_or_else(|| TransportError::Protocol("connection is closed".into()))?;
        ping_pong.ping(Ping::opaque()).await?;
        Ok(())
    }

    fn dispatch(&mut self, stream_id: u32, request: &HttpRequestSpec) -> Result<StreamEntry> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| closed_error("connection already closed"))?;

        let (completer, entry) = StreamEntry::channel();
        let message = Outbound {
            stream_id,
            request: self.to_http_request(request)?,
            body: request.body().cloned(),
            completer,
        };
        outbound
            .send(message)
            .map_err(|_| closed_error("connection event loop has stopped"))?;
        Ok(entry)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.ping_pong = None;
        self.event_loop.abort();
        self.driver.abort();
        self.open.store(false, Ordering::SeqCst);
        debug!(authority = %self.authority, "Closed connection");
    }
}

impl Drop for H2Connection {
    fn drop(&mut self) {
        self.event_loop.abort();
        self.driver.abort();
    }
}

fn closed_error(message: &str) -> TransportError {
    TransportError::connection(ConnectionFailure::Io, 1, message)
}

async fn event_loop(
    mut send_request: SendRequest<Bytes>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut in_flight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Some(response) = write_request(&mut send_request, message).await {
                        in_flight.push(response);
                    }
                }
                None => break,
            },
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
        }
    }
}

/// Write one request; on success return the future that completes its
/// response.
async fn write_request(
    send_request: &mut SendRequest<Bytes>,
    message: Outbound,
) -> Option<BoxFuture<'static, ()>> {
    let Outbound {
        stream_id,
        request,
        body,
        completer,
    } = message;

    let mut sender = match send_request.clone().ready().await {
        Ok(sender) => sender,
        Err(e) => {
            let _ = completer.write.send(Err(e.to_string()));
            return None;
        }
    };

    let (response, mut stream) = match sender.send_request(request, body.is_none()) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = completer.write.send(Err(e.to_string()));
            return None;
        }
    };

    if let Some(body) = body
        && let Err(e) = stream.send_data(body, true)
    {
        let _ = completer.write.send(Err(e.to_string()));
        return None;
    }

    debug!(stream_id, "Request written");
    let _ = completer.write.send(Ok(()));

    let response_tx = completer.response;
    Some(Box::pin(async move {
        let result = read_response(response).await;
        if let Err(message) = &result {
            warn!(stream_id, "Stream failed: {message}");
        }
        let _ = response_tx.send(result);
    }))
}

async fn read_response(response: ResponseFuture) -> std::result::Result<RawResponse, String> {
    let response = response.await.map_err(|e| e.to_string())?;
    let (parts, mut body) = response.into_parts();

    let mut buf = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        let _ = body.flow_control().release_capacity(chunk.len());
        buf.extend_from_slice(&chunk);
    }

    Ok(RawResponse::new(
        parts.status.as_u16(),
        parts.headers,
        String::from_utf8_lossy(&buf).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexed::table::{StreamOutcome, StreamTable};
    use crate::request::{ConnectionStyle, RequestHeaders};
    use http::Method;
    use tokio::io::DuplexStream;

    /// Serve every stream: echo `"<path> <request body>"`, or send
    /// `body_len` bytes of filler when it is non-zero.
    async fn serve(io: DuplexStream, max_concurrent_streams: u32, body_len: usize) {
        let mut connection = h2::server::Builder::new()
            .max_concurrent_streams(max_concurrent_streams)
            .handshake::<_, Bytes>(io)
            .await
            .unwrap();

        while let Some(accepted) = connection.accept().await {
            let (request, mut respond) = accepted.unwrap();
            tokio::spawn(async move {
                let (parts, mut body) = request.into_parts();
                let mut received = BytesMut::new();
                while let Some(chunk) = body.data().await {
                    let chunk = chunk.unwrap();
                    let _ = body.flow_control().release_capacity(chunk.len());
                    received.extend_from_slice(&chunk);
                }

                let payload = if body_len == 0 {
                    Bytes::from(format!(
                        "{} {}",
                        parts.uri.path(),
                        String::from_utf8_lossy(&received)
                    ))
                } else {
                    Bytes::from(vec![b'x'; body_len])
                };
                let response = http::Response::builder()
                    .status(200)
                    .header("x-rate-limit-remaining", "99")
                    .body(())
                    .unwrap();
                let mut stream = respond.send_response(response, false).unwrap();
                stream.send_data(payload, true).unwrap();
            });
        }
    }

    async fn connected(max_concurrent_streams: u32, body_len: usize) -> H2Connection {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, max_concurrent_streams, body_len));
        H2Connection::handshake(client, "https", "api.example.com", 443)
            .await
            .unwrap()
    }

    fn request(method: Method, path: &str, body: Option<&str>) -> HttpRequestSpec {
        HttpRequestSpec::builder(method, format!("https://api.example.com{path}"))
            .maybe_body(body.map(str::to_owned))
            .build(
                &RequestHeaders::new("Basic dGVzdDp0ZXN0"),
                ConnectionStyle::Multiplexed,
            )
            .unwrap()
    }

    async fn drain(table: &StreamTable) -> Vec<(u32, RawResponse)> {
        let drained: Vec<_> = table.drain_in_order(Duration::from_secs(5)).collect().await;
        drained
            .into_iter()
            .map(|(stream_id, outcome)| match outcome {
                StreamOutcome::Delivered(raw) => (stream_id, raw),
                other => panic!("stream {stream_id} not delivered: {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ready_completes_after_settings() {
        let mut connection = connected(100, 0).await;

        tokio::time::timeout(Duration::from_secs(5), connection.ready())
            .await
            .expect("settings handshake did not complete")
            .unwrap();
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_streams_complete_with_their_own_response() {
        let mut connection = connected(100, 0).await;
        connection.ready().await.unwrap();

        let table = StreamTable::new();
        let requests = [
            request(Method::GET, "/v3/devices/a", None),
            request(Method::POST, "/v3/push", Some(r#"{"platform":"all"}"#)),
            request(Method::DELETE, "/v3/aliases/b", None),
        ];
        for (stream_id, request) in [3, 5, 7].into_iter().zip(&requests) {
            let entry = connection.dispatch(stream_id, request).unwrap();
            table.register(stream_id, entry).unwrap();
        }

        let responses = drain(&table).await;
        let bodies: Vec<_> = responses
            .iter()
            .map(|(id, raw)| format!("{id}: {}", raw.body.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(
            bodies,
            vec![
                "3: /v3/devices/a ",
                r#"5: /v3/push {"platform":"all"}"#,
                "7: /v3/aliases/b ",
            ]
        );
        assert_eq!(responses[0].1.status, 200);
        assert_eq!(responses[0].1.headers["x-rate-limit-remaining"], "99");
    }

    #[tokio::test]
    async fn test_large_bodies_release_flow_control_capacity() {
        // Each body is larger than the default 64 KiB stream window.
        let mut connection = connected(1, 100_000).await;
        connection.ready().await.unwrap();

        let table = StreamTable::new();
        for stream_id in [3, 5, 7] {
            let entry = connection
                .dispatch(stream_id, &request(Method::GET, "/v3/report", None))
                .unwrap();
            table.register(stream_id, entry).unwrap();
        }

        let sizes: Vec<_> = drain(&table)
            .await
            .into_iter()
            .map(|(id, raw)| (id, raw.body.map(|body| body.len())))
            .collect();
        assert_eq!(
            sizes,
            vec![(3, Some(100_000)), (5, Some(100_000)), (7, Some(100_000))]
        );
    }

    #[tokio::test]
    async fn test_dispatch_after_close_fails() {
        let mut connection = connected(100, 0).await;
        connection.ready().await.unwrap();
        connection.close().await;

        assert!(!connection.is_open());
        let err = connection
            .dispatch(3, &request(Method::GET, "/v3/push", None))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connection {
                reason: ConnectionFailure::Io,
                ..
            }
        ));
        assert!(connection.ready().await.is_err());
    }

    #[test]
    fn test_alpn_must_be_h2() {
        assert!(check_alpn(Some(b"h2"), "api.example.com").is_ok());

        let err = check_alpn(Some(b"http/1.1"), "api.example.com").unwrap_err();
        assert!(matches!(err, TransportError::Protocol(ref m) if m.contains("did not negotiate h2")));
        assert!(check_alpn(None, "api.example.com").is_err());
    }

    #[test]
    fn test_connector_requires_https() {
        let url = Url::parse("http://api.example.com").unwrap();
        let err = H2Connector::new(&url, &TransportConfig::default(), &TrustPolicy::WebPki, None)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }
}
