//! Correlation of in-flight streams to their responses.

use crate::error::{ConnectionFailure, Result, TransportError};
use crate::response::RawResponse;
use futures::Stream;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Resolves once the request has been written, or failed to be.
pub type WriteCompletion = oneshot::Receiver<std::result::Result<(), String>>;

/// Resolves once the full response has arrived, or the stream failed.
pub type ResponseCompletion = oneshot::Receiver<std::result::Result<RawResponse, String>>;

/// Completions awaited for one stream.
#[derive(Debug)]
pub struct StreamEntry {
    write: WriteCompletion,
    response: ResponseCompletion,
}

/// Sending halves of a [`StreamEntry`], held by whoever drives the stream.
///
/// Dropping a half without sending counts as a failure of that phase.
#[derive(Debug)]
pub struct StreamCompleter {
    /// Signals the write phase
    pub write: oneshot::Sender<std::result::Result<(), String>>,
    /// Signals the response phase
    pub response: oneshot::Sender<std::result::Result<RawResponse, String>>,
}

impl StreamEntry {
    /// Pair existing completions.
    pub fn new(write: WriteCompletion, response: ResponseCompletion) -> Self {
        Self { write, response }
    }

    /// Create an entry together with the handle that completes it.
    pub fn channel() -> (StreamCompleter, StreamEntry) {
        let (write_tx, write_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        (
            StreamCompleter {
                write: write_tx,
                response: response_tx,
            },
            StreamEntry::new(write_rx, response_rx),
        )
    }
}

/// What became of one stream when it was drained.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The response arrived.
    Delivered(RawResponse),
    /// The request could not be written.
    WriteFailed(String),
    /// The request was not written within the timeout.
    WriteTimedOut,
    /// The stream failed after the request was written.
    ResponseFailed(String),
    /// No response arrived within the timeout.
    ResponseTimedOut,
}

impl StreamOutcome {
    /// Map failures onto transport errors.
    pub fn into_result(self, stream_id: u32) -> Result<RawResponse> {
        match self {
            Self::Delivered(response) => Ok(response),
            Self::WriteFailed(message) => Err(TransportError::connection(
                ConnectionFailure::Io,
                1,
                format!("failed to write stream {stream_id}: {message}"),
            )),
            Self::WriteTimedOut => Err(TransportError::connection(
                ConnectionFailure::Io,
                1,
                format!("timed out waiting to write for stream id {stream_id}"),
            )),
            Self::ResponseFailed(message) => Err(TransportError::connection(
                ConnectionFailure::Io,
                1,
                format!("stream {stream_id} failed: {message}"),
            )),
            Self::ResponseTimedOut => Err(TransportError::ResponseTimeout { stream_id }),
        }
    }
}

/// Ordered table of pending streams keyed by stream id.
///
/// The lock is only held to insert or pop an entry, never while waiting on
/// a completion.
#[derive(Debug, Clone, Default)]
pub struct StreamTable {
    entries: Arc<Mutex<BTreeMap<u32, StreamEntry>>>,
}

impl StreamTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, StreamEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DuplicateStream`] if `stream_id` is pending.
    pub fn register(&self, stream_id: u32, entry: StreamEntry) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(&stream_id) {
            return Err(TransportError::DuplicateStream(stream_id));
        }
        entries.insert(stream_id, entry);
        Ok(())
    }

    /// Number of pending streams.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `stream_id` is pending.
    pub fn contains(&self, stream_id: u32) -> bool {
        self.lock().contains_key(&stream_id)
    }

    /// Abandon every pending stream.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Wait for pending streams in ascending id order.
    ///
    /// Each entry gets `timeout` for its write and `timeout` for its
    /// response, and is removed from the table as it is yielded. Responses
    /// that arrive early stay buffered in their entry until drained.
    pub fn drain_in_order(
        &self,
        timeout: Duration,
    ) -> impl Stream<Item = (u32, StreamOutcome)> + Send + 'static {
        futures::stream::unfold(self.clone(), move |table| async move {
            let (stream_id, entry) = table.lock().pop_first()?;
            let outcome = await_entry(entry, timeout).await;
            Some(((stream_id, outcome), table))
        })
    }
}

async fn await_entry(entry: StreamEntry, timeout: Duration) -> StreamOutcome {
    match tokio::time::timeout(timeout, entry.write).await {
        Err(_) => return StreamOutcome::WriteTimedOut,
        Ok(Err(_)) => {
            return StreamOutcome::WriteFailed("connection closed before the write".to_string());
        }
        Ok(Ok(Err(message))) => return StreamOutcome::WriteFailed(message),
        Ok(Ok(Ok(()))) => {}
    }

    match tokio::time::timeout(timeout, entry.response).await {
        Err(_) => StreamOutcome::ResponseTimedOut,
        Ok(Err(_)) => {
            StreamOutcome::ResponseFailed("connection closed before the response".to_string())
        }
        Ok(Ok(Err(message))) => StreamOutcome::ResponseFailed(message),
        Ok(Ok(Ok(response))) => StreamOutcome::Delivered(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http::HeaderMap;

    fn ok(body: &str) -> std::result::Result<RawResponse, String> {
        Ok(RawResponse::new(200, HeaderMap::new(), body))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let table = StreamTable::new();
        let (_c1, e1) = StreamEntry::channel();
        let (_c2, e2) = StreamEntry::channel();

        table.register(3, e1).unwrap();
        let err = table.register(3, e2).unwrap_err();
        assert!(matches!(err, TransportError::DuplicateStream(3)));
        assert_eq!(table.len(), 1);
        assert!(table.contains(3));

        table.clear();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_drain_is_ascending_even_if_later_stream_answers_first() {
        let table = StreamTable::new();
        let (c3, e3) = StreamEntry::channel();
        let (c5, e5) = StreamEntry::channel();
        table.register(5, e5).unwrap();
        table.register(3, e3).unwrap();

        c5.write.send(Ok(())).unwrap();
        c5.response.send(ok("five")).unwrap();
        c3.write.send(Ok(())).unwrap();
        c3.response.send(ok("three")).unwrap();

        let drained: Vec<_> = table.drain_in_order(Duration::from_secs(1)).collect().await;
        let ids: Vec<u32> = drained.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 5]);
        match &drained[0].1 {
            StreamOutcome::Delivered(raw) => assert_eq!(raw.body.as_deref(), Some("three")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_per_entry() {
        let table = StreamTable::new();
        let (c3, e3) = StreamEntry::channel();
        let (_c5, e5) = StreamEntry::channel();
        table.register(3, e3).unwrap();
        table.register(5, e5).unwrap();
        c3.write.send(Ok(())).unwrap();

        let drained: Vec<_> = table.drain_in_order(Duration::from_secs(15)).collect().await;

        assert!(matches!(drained[0], (3, StreamOutcome::ResponseTimedOut)));
        assert!(matches!(drained[1], (5, StreamOutcome::WriteTimedOut)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_completer_is_failure() {
        let table = StreamTable::new();
        let (c3, e3) = StreamEntry::channel();
        table.register(3, e3).unwrap();
        c3.write.send(Err("broken pipe".into())).unwrap();
        drop(c3.response);

        let drained: Vec<_> = table.drain_in_order(Duration::from_secs(1)).collect().await;
        match &drained[0].1 {
            StreamOutcome::WriteFailed(message) => assert_eq!(message, "broken pipe"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_outcome_into_result() {
        let err = StreamOutcome::ResponseTimedOut.into_result(7).unwrap_err();
        assert_eq!(err.stream_id(), Some(7));

        let err = StreamOutcome::WriteFailed("reset".into())
            .into_result(5)
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
    }
}
