//!
//! # Watch engine
//!
//! Consumes the server's chunked watch responses and turns them into a typed
//! event stream. The engine owns the connection lifecycle: it records a
//! resume checkpoint from every frame, reconnects from that checkpoint after
//! interruptions, and starts over from scratch when the server reports the
//! checkpoint expired. Consumers see one ordered stream with no duplicated
//! events across reconnects.
//!
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_channel::{Receiver, Sender};
use futures_util::{Stream, StreamExt};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kubesdk_types::{K8Status, ListOptions};

use crate::error::{ClientError, StatusError, TransportError};
use crate::pipeline::cancelled;
use crate::policy::ExecutionPolicy;
use crate::session::Session;
use crate::transport::{ApiRequest, Transport};

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// checkpoint-only frame; no object changed
    Bookmark { resource_version: String },
}

/// Typed watch stream. Dropping it cancels the engine and closes the
/// connection; [`WatchStream::close`] does the same explicitly.
pub struct WatchStream<K> {
    // the receiver pins internal wakers, so it stays boxed and the
    // stream handle itself remains freely movable
    receiver: Pin<Box<Receiver<Result<WatchEvent<K>, ClientError>>>>,
    cancel: CancellationToken,
}

impl<K> WatchStream<K> {
    pub fn close(&self) {
        self.cancel.cancel();
        self.receiver.close();
    }
}

impl<K> Stream for WatchStream<K> {
    type Item = Result<WatchEvent<K>, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.as_mut().poll_next(cx)
    }
}

impl<K> Drop for WatchStream<K> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(serde::Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    object: Value,
}

/// reassembles newline-delimited frames out of arbitrary chunk boundaries
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

enum Flow {
    /// reconnect from the current checkpoint after a backoff
    Reconnect,
    /// checkpoint expired; drop it and reconnect from scratch
    Resync,
    Terminate,
}

pub(crate) fn spawn_watch<T, K>(
    transport: Arc<T>,
    session: Arc<Session>,
    path: String,
    options: ListOptions,
    policy: ExecutionPolicy,
) -> WatchStream<K>
where
    T: Transport,
    K: DeserializeOwned + Send + 'static,
{
    let (sender, receiver) = async_channel::bounded(1);
    let cancel = CancellationToken::new();
    let engine = WatchEngine {
        transport,
        session,
        path,
        checkpoint: options.resource_version.clone(),
        options,
        policy,
        sender,
        cancel: cancel.clone(),
    };
    tokio::spawn(engine.run());
    WatchStream {
        receiver: Box::pin(receiver),
        cancel,
    }
}

struct WatchEngine<T, K> {
    transport: Arc<T>,
    session: Arc<Session>,
    path: String,
    options: ListOptions,
    policy: ExecutionPolicy,
    sender: Sender<Result<WatchEvent<K>, ClientError>>,
    cancel: CancellationToken,
    checkpoint: Option<String>,
}

impl<T, K> WatchEngine<T, K>
where
    T: Transport,
    K: DeserializeOwned + Send + 'static,
{
    async fn run(mut self) {
        // consecutive failures since the last healthy frame
        let mut failures: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.connect_and_pump(&mut failures).await {
                Flow::Reconnect => {
                    if !self.backoff_or_die(&mut failures).await {
                        return;
                    }
                }
                // resyncs share the failure budget so a server that keeps
                // answering 410 cannot drive a zero-delay reconnect loop
                Flow::Resync => {
                    self.checkpoint = None;
                    if !self.backoff_or_die(&mut failures).await {
                        return;
                    }
                }
                Flow::Terminate => return,
            }
        }
    }

    fn build_request(&self) -> ApiRequest {
        // only the watch flag and the resume checkpoint are forced; whether
        // the server sends bookmark frames stays the caller's choice
        let options = ListOptions {
            resource_version: self.checkpoint.clone(),
            watch: true,
            ..self.options.clone()
        };
        ApiRequest::get(self.path.clone()).with_query(options.query_pairs())
    }

    async fn connect_and_pump(&mut self, failures: &mut u32) -> Flow {
        let request = self.build_request();
        let opened = tokio::select! {
            _ = cancelled(Some(&self.cancel)) => return Flow::Terminate,
            opened = self.transport.open_stream(&self.session, &request) => opened,
        };

        let (status, mut stream) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                warn!(path = %self.path, error = %err, "watch connection failed");
                return Flow::Reconnect;
            }
        };

        if status == StatusCode::GONE {
            debug!(path = %self.path, "watch checkpoint expired, resyncing");
            return Flow::Resync;
        }
        if !status.is_success() {
            warn!(path = %self.path, %status, "watch connection rejected");
            return Flow::Reconnect;
        }

        let mut lines = LineBuffer::default();
        loop {
            let chunk = tokio::select! {
                _ = cancelled(Some(&self.cancel)) => return Flow::Terminate,
                chunk = stream.next() => chunk,
            };
            match chunk {
                None => {
                    debug!(path = %self.path, "watch stream ended, reconnecting");
                    return Flow::Reconnect;
                }
                Some(Err(err)) => {
                    warn!(path = %self.path, error = %err, "watch stream interrupted");
                    return Flow::Reconnect;
                }
                Some(Ok(bytes)) => {
                    lines.extend(&bytes);
                    while let Some(line) = lines.next_line() {
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(flow) = self.handle_line(&line, failures).await {
                            return flow;
                        }
                    }
                }
            }
        }
    }

    /// one complete frame; `Some(flow)` breaks out of the pump loop
    async fn handle_line(&mut self, line: &[u8], failures: &mut u32) -> Option<Flow> {
        let frame: RawFrame = match serde_json::from_slice(line) {
            Ok(frame) => frame,
            Err(err) => {
                self.emit(Err(ClientError::Protocol(format!(
                    "malformed watch frame: {err}"
                ))))
                .await;
                return Some(Flow::Terminate);
            }
        };

        match frame.kind.as_str() {
            "ADDED" | "MODIFIED" | "DELETED" => {
                if let Some(rv) = frame
                    .object
                    .pointer("/metadata/resourceVersion")
                    .and_then(Value::as_str)
                {
                    self.checkpoint = Some(rv.to_owned());
                }
                let item: K = match serde_json::from_value(frame.object) {
                    Ok(item) => item,
                    Err(err) => {
                        self.emit(Err(ClientError::Protocol(format!(
                            "undecodable watch object: {err}"
                        ))))
                        .await;
                        return Some(Flow::Terminate);
                    }
                };
                let event = match frame.kind.as_str() {
                    "ADDED" => WatchEvent::Added(item),
                    "MODIFIED" => WatchEvent::Modified(item),
                    _ => WatchEvent::Deleted(item),
                };
                *failures = 0;
                if !self.emit(Ok(event)).await {
                    return Some(Flow::Terminate);
                }
                None
            }
            "BOOKMARK" => {
                let rv = frame
                    .object
                    .pointer("/metadata/resourceVersion")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                if !rv.is_empty() {
                    self.checkpoint = Some(rv.clone());
                }
                *failures = 0;
                if !self
                    .emit(Ok(WatchEvent::Bookmark {
                        resource_version: rv,
                    }))
                    .await
                {
                    return Some(Flow::Terminate);
                }
                None
            }
            "ERROR" => {
                let status: K8Status =
                    serde_json::from_value(frame.object).unwrap_or_default();
                if status.is_gone() {
                    debug!(path = %self.path, "watch checkpoint expired mid-stream, resyncing");
                    return Some(Flow::Resync);
                }
                let code = status
                    .code
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                self.emit(Err(StatusError::new(code, Some(status)).into()))
                    .await;
                Some(Flow::Terminate)
            }
            other => {
                self.emit(Err(ClientError::Protocol(format!(
                    "unknown watch frame type `{other}`"
                ))))
                .await;
                Some(Flow::Terminate)
            }
        }
    }

    /// sleeps before the next reconnect; `false` ends the engine
    async fn backoff_or_die(&self, failures: &mut u32) -> bool {
        *failures += 1;
        if *failures >= self.policy.max_attempts {
            self.emit(Err(ClientError::Transport(TransportError::Stream(
                format!("watch gave up after {} consecutive failures", *failures),
            ))))
            .await;
            return false;
        }
        let delay = self.policy.interval.interval(*failures - 1);
        tokio::select! {
            _ = cancelled(Some(&self.cancel)) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// `false` when the consumer is gone or the stream was cancelled
    async fn emit(&self, item: Result<WatchEvent<K>, ClientError>) -> bool {
        tokio::select! {
            _ = cancelled(Some(&self.cancel)) => false,
            sent = self.sender.send(item) => sent.is_ok(),
        }
    }
}
