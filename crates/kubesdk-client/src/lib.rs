//!
//! # kubesdk client runtime
//!
//! Typed, resilient access to Kubernetes-style API servers: a session
//! registry for multi-cluster setups, a retrying request pipeline, diff-based
//! updates and self-healing watch streams.
//!
mod client;
mod error;
mod pipeline;
mod policy;
mod session;
mod transport;
mod watch;

pub use client::{batch, ApplyResult, CallOptions, K8Client};
pub use error::{ClientError, StatusError, StatusKind, TransportError};
pub use policy::{
    AttemptOutcome, AttemptRecord, BackoffInterval, ExecutionPolicy, ExecutionPolicyBuilder,
    LogConfig, LogConfigBuilder, RequestLogger, TracingLogger,
};
pub use session::{Session, SessionRegistry};
pub use transport::{ApiRequest, ApiResponse, ByteStream, HttpTransport, Transport};
pub use watch::{WatchEvent, WatchStream};

pub use kubesdk_diff as diff;
pub use kubesdk_types as meta;
