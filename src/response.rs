//! The primitive response envelope and the output membrane.
//!
//! Every primitive produces one [`Response`]: success with data, or an
//! error carrying a closed-taxonomy kind and a single-line message. All
//! user-visible text flows through a [`Sink`] — primitives never write to
//! raw output.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::{ChoraError, ErrorKind};

/// The standard response envelope produced by every primitive.
#[derive(Clone, Debug)]
pub enum Response {
    /// The primitive succeeded.
    Success {
        /// Result payload.
        data: Value,
    },
    /// The primitive failed.
    Error {
        /// Closed-taxonomy kind.
        kind: ErrorKind,
        /// Single-line failure summary.
        message: String,
    },
}

impl Response {
    /// Builds a success envelope.
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    /// Builds an error envelope.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for success envelopes.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The payload, when successful.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data } => Some(data),
            Self::Error { .. } => None,
        }
    }

    /// The error kind, when failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    /// Serializes to the wire shape
    /// `{status, data?, error_kind?, error_message?}`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success { data } => json!({
                "status": "success",
                "data": data,
            }),
            Self::Error { kind, message } => json!({
                "status": "error",
                "error_kind": kind.as_str(),
                "error_message": message,
            }),
        }
    }
}

impl From<crate::error::Result<Value>> for Response {
    /// Wraps a handler result: errors collapse to their taxonomy kind and
    /// a single-line message.
    fn from(result: crate::error::Result<Value>) -> Self {
        match result {
            Ok(data) => Self::Success { data },
            Err(e) => Self::Error {
                kind: e.kind(),
                message: single_line(&e),
            },
        }
    }
}

fn single_line(e: &ChoraError) -> String {
    e.to_string().replace('\n', " ")
}

/// The output membrane: everything a user sees goes through here.
pub trait Sink: Send + Sync {
    /// Emits one line of user-visible text.
    fn emit(&self, line: &str);
}

/// The default sink: standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{}", line);
    }
}

/// A sink that buffers lines in memory. Intended for tests and for front
/// ends that render output themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Creates an empty buffering sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns and clears the buffered lines.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut self.lines.lock().expect("sink lock poisoned"))
    }

    /// Returns a copy of the buffered lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock poisoned").clone()
    }
}

impl Sink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .expect("sink lock poisoned")
            .push(line.to_string());
    }
}
