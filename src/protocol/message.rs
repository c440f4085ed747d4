//! Request and response messages carried inside frames.
//!
//! Parameter and result values use `serde_json::Value` as the dynamic value
//! model, so any payload codec that can carry serde data can carry them.
//!
//! A [`Response`] holds an [`Outcome`], which is either a result value or an
//! [`RpcError`]. Never both, never neither.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response.
    pub id: u64,
    /// Interface identifier, e.g. `"Calculator"`.
    pub interface: String,
    /// Method name.
    pub method: String,
    /// Ordered parameter-type descriptors, e.g. `["int", "int"]`.
    pub param_types: Vec<String>,
    /// Ordered parameter values.
    pub params: Vec<Value>,
}

impl Request {
    /// Create a request.
    pub fn new(
        id: u64,
        interface: impl Into<String>,
        method: impl Into<String>,
        param_types: Vec<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            id,
            interface: interface.into(),
            method: method.into(),
            param_types,
            params,
        }
    }
}

/// Kind of a per-request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No implementation is registered for the interface.
    ServiceNotFound,
    /// The implementation has no method with that name and parameter types.
    MethodNotFound,
    /// The method ran and failed, or its arguments/result could not be converted.
    InvocationFailed,
    /// The worker pool queue is full.
    ServerBusy,
}

impl ErrorKind {
    /// Stable name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceNotFound => "ServiceNotFound",
            Self::MethodNotFound => "MethodNotFound",
            Self::InvocationFailed => "InvocationFailed",
            Self::ServerBusy => "ServerBusy",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error descriptor returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RpcError {
    /// Create an error descriptor.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of a call: exactly one of a value or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The method returned this value.
    Result(Value),
    /// The call failed.
    Error(RpcError),
}

impl Outcome {
    /// Shorthand for an error outcome.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(RpcError::new(kind, message))
    }
}

/// An outbound reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the originating request.
    pub id: u64,
    /// Value or error.
    pub outcome: Outcome,
}

impl Response {
    /// Successful response.
    pub fn ok(id: u64, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(value),
        }
    }

    /// Failed response.
    pub fn error(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::error(kind, message),
        }
    }

    /// Build a response from an outcome.
    pub fn from_outcome(id: u64, outcome: Outcome) -> Self {
        Self { id, outcome }
    }

    /// The result value, if the call succeeded.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    /// The error descriptor, if the call failed.
    pub fn error_descriptor(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    /// The error kind, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_descriptor().map(|e| e.kind)
    }

    /// True if the call succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }
}
