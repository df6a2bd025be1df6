//! Scripted multiplexed connection for testing without a real HTTP/2 peer
//!
//! Records every dispatched stream and answers according to a [`Script`]:
//! in order or in reverse, never for a held stream, or with a failed write.

#![allow(dead_code)]

use async_trait::async_trait;
use http::HeaderMap;
use pushlink_transport::error::Result;
use pushlink_transport::multiplexed::{
    MultiplexedTransport, MuxConnection, MuxConnector, StreamEntry,
};
use pushlink_transport::{HttpRequestSpec, RawResponse, TransportConfig, TrustPolicy};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const BASE_URL: &str = "https://api.example.com";
pub const AUTHORIZATION: &str = "Basic YXBwS2V5Om1hc3RlclNlY3JldA==";

type Responder = Arc<dyn Fn(u32, &HttpRequestSpec) -> RawResponse + Send + Sync>;

/// How the scripted peer behaves.
#[derive(Clone)]
pub struct Script {
    /// Builds the response for a stream; by default 200 echoing the path
    pub respond: Responder,
    /// Answer later streams first
    pub reverse: bool,
    /// Never answer this stream
    pub hold_stream: Option<u32>,
    /// Fail the write of this stream
    pub fail_write: Option<u32>,
    /// Never complete the settings handshake
    pub never_ready: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            respond: Arc::new(|_, request| {
                RawResponse::new(200, HeaderMap::new(), request.path_and_query())
            }),
            reverse: false,
            hold_stream: None,
            fail_write: None,
            never_ready: false,
        }
    }
}

/// What the scripted peer observed.
#[derive(Default)]
pub struct ScriptLog {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    /// `(stream id, method, path)` in dispatch order
    pub dispatched: Mutex<Vec<(u32, String, String)>>,
    /// Stream ids in the order their responses were sent
    pub answered: Mutex<Vec<u32>>,
}

impl ScriptLog {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| *id)
            .collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, path)| path.clone())
            .collect()
    }

    pub fn answered(&self) -> Vec<u32> {
        self.answered.lock().unwrap().clone()
    }
}

pub struct ScriptedConnector {
    script: Script,
    log: Arc<ScriptLog>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> (Arc<Self>, Arc<ScriptLog>) {
        let log = Arc::new(ScriptLog::default());
        let connector = Arc::new(Self {
            script,
            log: Arc::clone(&log),
        });
        (connector, log)
    }
}

#[async_trait]
impl MuxConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn MuxConnection>> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            open: AtomicBool::new(true),
            held: Vec::new(),
        }))
    }
}

struct ScriptedConnection {
    script: Script,
    log: Arc<ScriptLog>,
    open: AtomicBool,
    // Kept alive so a held stream times out instead of failing.
    held: Vec<oneshot::Sender<std::result::Result<RawResponse, String>>>,
}

#[async_trait]
impl MuxConnection for ScriptedConnection {
    async fn ready(&mut self) -> Result<()> {
        if self.script.never_ready {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    fn dispatch(&mut self, stream_id: u32, request: &HttpRequestSpec) -> Result<StreamEntry> {
        self.log.dispatched.lock().unwrap().push((
            stream_id,
            request.method().to_string(),
            request.path_and_query(),
        ));

        let (completer, entry) = StreamEntry::channel();
        if self.script.fail_write == Some(stream_id) {
            let _ = completer.write.send(Err("stream reset by peer".to_string()));
            return Ok(entry);
        }
        if self.script.hold_stream == Some(stream_id) {
            let _ = completer.write.send(Ok(()));
            self.held.push(completer.response);
            return Ok(entry);
        }

        let _ = completer.write.send(Ok(()));
        let response = (self.script.respond)(stream_id, request);
        let log = Arc::clone(&self.log);
        let delay = if self.script.reverse {
            Duration::from_millis(200u64.saturating_sub(u64::from(stream_id) * 10))
        } else {
            Duration::ZERO
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log.answered.lock().unwrap().push(stream_id);
            let _ = completer.response.send(Ok(response));
        });
        Ok(entry)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.held.clear();
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn transport_with(script: Script) -> (MultiplexedTransport, Arc<ScriptLog>) {
    transport_with_config(script, TransportConfig::default())
}

pub fn transport_with_config(
    script: Script,
    config: TransportConfig,
) -> (MultiplexedTransport, Arc<ScriptLog>) {
    let (connector, log) = ScriptedConnector::new(script);
    let transport = MultiplexedTransport::builder(BASE_URL)
        .authorization(AUTHORIZATION)
        .trust_policy(TrustPolicy::WebPki)
        .config(config)
        .connector(connector)
        .build()
        .expect("Failed to build multiplexed transport");
    (transport, log)
}

pub fn url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}
