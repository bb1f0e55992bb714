#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use kubesdk_client::meta::{object_meta_shape, Crd, CrdNames, ObjectMeta, Resource, Shape};
use kubesdk_client::{
    ApiRequest, ApiResponse, AttemptRecord, ByteStream, K8Client, LogConfig, RequestLogger,
    Session, Transport, TransportError,
};

/// test resource: a core-group ConfigMap with a string-map payload
pub struct ConfigMapType;

impl Resource for ConfigMapType {
    fn crd() -> &'static Crd {
        &Crd {
            group: "",
            version: "v1",
            names: CrdNames {
                kind: "ConfigMap",
                plural: "configmaps",
                singular: "configmap",
            },
        }
    }

    fn shape() -> Shape {
        Shape::record([
            ("metadata", object_meta_shape()),
            ("data", Shape::map(Shape::Scalar)),
        ])
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestConfigMap {
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, String>,
}

pub fn config_map_json(name: &str, rv: &str, data: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "default", "resourceVersion": rv},
        "data": data
    })
}

pub fn status_json(code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "reason": reason,
        "message": format!("{reason} ({code})"),
        "code": code
    })
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub content_type: Option<&'static str>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub enum Scripted {
    Reply { status: u16, body: Value },
    Fail(String),
    /// never resolves; exercises deadlines and cancellation
    Hang,
}

pub enum StreamAction {
    /// one whole frame, newline-terminated on the wire
    Frame(Value),
    /// raw bytes, for chunk-boundary tests
    Chunk(Vec<u8>),
    Interrupt(String),
}

pub enum StreamEnd {
    Eof,
    /// connection stays open with nothing more to read
    Hold,
}

pub struct ScriptedStream {
    pub status: u16,
    pub actions: Vec<StreamAction>,
    pub end: StreamEnd,
}

#[derive(Default)]
struct Inner {
    replies: Mutex<VecDeque<Scripted>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<RecordedRequest>>,
    active_streams: AtomicUsize,
}

/// Scripted transport: unary replies and watch streams are consumed in the
/// order they were pushed, every request is recorded, and open watch
/// connections are counted so tests can assert teardown.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, status: u16, body: Value) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Scripted::Reply { status, body });
    }

    pub fn push_failure(&self, detail: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(detail.to_owned()));
    }

    pub fn push_hang(&self) {
        self.inner.replies.lock().unwrap().push_back(Scripted::Hang);
    }

    pub fn push_stream(&self, scripted: ScriptedStream) {
        self.inner.streams.lock().unwrap().push_back(scripted);
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn active_streams(&self) -> usize {
        self.inner.active_streams.load(Ordering::SeqCst)
    }

    fn record(&self, request: &ApiRequest) {
        self.inner.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.to_string(),
            path: request.path.clone(),
            query: request.query.clone(),
            content_type: request.content_type,
            body: request
                .body
                .as_ref()
                .and_then(|bytes| serde_json::from_slice(bytes).ok()),
        });
    }
}

struct ActiveGuard(Arc<Inner>);

impl ActiveGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.active_streams.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        _session: &Session,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        self.record(request);
        let scripted = self
            .inner
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted request: {} {}", request.method, request.path));
        match scripted {
            Scripted::Reply { status, body } => Ok(ApiResponse {
                status: StatusCode::from_u16(status).expect("scripted status"),
                body: Bytes::from(serde_json::to_vec(&body).expect("scripted body")),
            }),
            Scripted::Fail(detail) => Err(TransportError::Connect(detail)),
            Scripted::Hang => futures_util::future::pending().await,
        }
    }

    async fn open_stream(
        &self,
        _session: &Session,
        request: &ApiRequest,
    ) -> Result<(StatusCode, ByteStream), TransportError> {
        self.record(request);
        let scripted = self
            .inner
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted stream: {} {}", request.method, request.path));

        let items: Vec<Result<Bytes, TransportError>> = scripted
            .actions
            .into_iter()
            .map(|action| match action {
                StreamAction::Frame(value) => Ok(Bytes::from(format!(
                    "{}\n",
                    serde_json::to_string(&value).expect("scripted frame")
                ))),
                StreamAction::Chunk(bytes) => Ok(Bytes::from(bytes)),
                StreamAction::Interrupt(detail) => Err(TransportError::Stream(detail)),
            })
            .collect();

        let head = stream::iter(items);
        let stream: ByteStream = match scripted.end {
            StreamEnd::Eof => head.boxed(),
            StreamEnd::Hold => head.chain(stream::pending()).boxed(),
        };
        // the guard lives in the outermost wrapper so the connection counts
        // as open until the consumer drops the whole stream, not just until
        // the scripted actions run out
        let guard = ActiveGuard::new(self.inner.clone());
        let stream = stream
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed();
        Ok((
            StatusCode::from_u16(scripted.status).expect("scripted status"),
            stream,
        ))
    }
}

/// logger capturing every attempt record for assertions
#[derive(Default)]
pub struct MockLogger {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MockLogger {
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RequestLogger for MockLogger {
    fn on_attempt(&self, record: &AttemptRecord, _config: &LogConfig) {
        self.records.lock().unwrap().push(record.clone());
    }
}

pub async fn logged_in_client(transport: MockTransport) -> K8Client<MockTransport> {
    let client = K8Client::with_transport(transport);
    client
        .login(Session::new("test", "https://test.example:6443"))
        .await;
    client
}

pub async fn logged_in_client_with_logger(
    transport: MockTransport,
    logger: Arc<MockLogger>,
) -> K8Client<MockTransport> {
    let client = K8Client::with_logger(transport, logger);
    client
        .login(Session::new("test", "https://test.example:6443"))
        .await;
    client
}
