//!
//! # Session registry
//!
//! A [`Session`] holds everything needed to reach one API server. The
//! [`SessionRegistry`] keeps the logged-in sessions by name with one of them
//! marked as the default, so a call site can omit the server entirely or pick
//! one by name per request.
//!
use std::collections::HashMap;
use std::sync::Arc;

use async_lock::RwLock;

use crate::error::ClientError;

/// Immutable connection parameters for one API server. Sessions are shared
/// behind [`Arc`]; changing a parameter means logging in again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub server: String,
    pub token: Option<String>,
    pub accept_invalid_certs: bool,
    pub default_namespace: String,
}

impl Session {
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            token: None,
            accept_invalid_certs: false,
            default_namespace: "default".to_owned(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<Session>>,
    default: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its name. The first login becomes the
    /// default; later logins replace any previous session of the same name
    /// without stealing the default slot.
    pub async fn login(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(session.name.clone(), session.clone());
        if inner.default.is_none() {
            inner.default = Some(session.name.clone());
        }
        session
    }

    /// Drops a session. When the default is logged out, another session is
    /// promoted if one remains.
    pub async fn logout(&self, name: &str) {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(name);
        if inner.default.as_deref() == Some(name) {
            inner.default = inner.sessions.keys().next().cloned();
        }
    }

    pub async fn set_default(&self, name: &str) -> Result<(), ClientError> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(name) {
            return Err(ClientError::NoSession(name.to_owned()));
        }
        inner.default = Some(name.to_owned());
        Ok(())
    }

    /// Looks up a session by name, or the default when `name` is `None`.
    pub async fn resolve(&self, name: Option<&str>) -> Result<Arc<Session>, ClientError> {
        let inner = self.inner.read().await;
        match name {
            Some(name) => inner
                .sessions
                .get(name)
                .cloned()
                .ok_or_else(|| ClientError::NoSession(name.to_owned())),
            None => {
                let default = inner
                    .default
                    .as_deref()
                    .ok_or_else(|| ClientError::NoSession("<default>".to_owned()))?;
                inner
                    .sessions
                    .get(default)
                    .cloned()
                    .ok_or_else(|| ClientError::NoSession(default.to_owned()))
            }
        }
    }

    pub async fn names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.sessions.keys().cloned().collect();
        names.sort();
        names
    }
}
