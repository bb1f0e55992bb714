//!
//! # Transport layer
//!
//! [`Transport`] is the seam between the pipeline and the wire: one call for
//! unary requests, one for long-lived byte streams. The production
//! implementation rides on `reqwest`; tests substitute a scripted one.
//!
use std::collections::HashMap;

use async_lock::Mutex;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;

use kubesdk_types::K8Status;

use crate::error::TransportError;
use crate::session::Session;

/// a request already rendered down to wire terms
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub content_type: Option<&'static str>,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, content_type: &'static str, body: Bytes) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// decoded `Status` body, when the payload is one
    pub fn status_body(&self) -> Option<K8Status> {
        let status: K8Status = serde_json::from_slice(&self.body).ok()?;
        status.is_status_kind().then_some(status)
    }
}

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// one request, one buffered response
    async fn execute(
        &self,
        session: &Session,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError>;

    /// long-lived response body as a chunk stream; the status line is read
    /// before any chunk is yielded
    async fn open_stream(
        &self,
        session: &Session,
        request: &ApiRequest,
    ) -> Result<(StatusCode, ByteStream), TransportError>;
}

/// `reqwest`-backed transport, one connection pool per session
#[derive(Debug, Default)]
pub struct HttpTransport {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client_for(&self, session: &Session) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&session.name) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(session.accept_invalid_certs)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        clients.insert(session.name.clone(), client.clone());
        Ok(client)
    }

    fn build(
        &self,
        client: &reqwest::Client,
        session: &Session,
        request: &ApiRequest,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", session.server, request.path);
        let mut builder = client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &session.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = request.content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        session: &Session,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        let client = self.client_for(session).await?;
        let response = self.build(&client, session, request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(ApiResponse { status, body })
    }

    async fn open_stream(
        &self,
        session: &Session,
        request: &ApiRequest,
    ) -> Result<(StatusCode, ByteStream), TransportError> {
        let client = self.client_for(session).await?;
        let response = self.build(&client, session, request).send().await?;
        let status = response.status();
        let stream = response
            .bytes_stream()
            .map_err(|err| TransportError::Stream(err.to_string()))
            .boxed();
        Ok((status, stream))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_body_requires_status_kind() {
        let response = ApiResponse {
            status: StatusCode::NOT_FOUND,
            body: Bytes::from(
                serde_json::to_vec(&json!({
                    "kind": "Status",
                    "reason": "NotFound",
                    "code": 404
                }))
                .expect("encode"),
            ),
        };
        let status = response.status_body().expect("status body");
        assert_eq!(status.code, Some(404));

        let plain = ApiResponse {
            status: StatusCode::OK,
            body: Bytes::from_static(b"{\"kind\": \"ConfigMap\"}"),
        };
        assert!(plain.status_body().is_none());
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::get("/api/v1/namespaces/default/pods")
            .with_query(vec![("watch".to_owned(), "true".to_owned())]);
        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_none());

        let request = ApiRequest::new(Method::PATCH, "/apis/apps/v1/x")
            .with_body("application/merge-patch+json", Bytes::from_static(b"{}"));
        assert_eq!(request.content_type, Some("application/merge-patch+json"));
    }
}
