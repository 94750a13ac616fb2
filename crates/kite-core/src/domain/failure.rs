//! Failure model: what a dispatched operation hands to exception handlers.
//!
//! A failure is either an error returned by the operation or a panic caught
//! while polling it. Handlers and the awaiting party receive clones of the
//! same value, so the payload is shared behind an `Arc`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LaunchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation completed with `Err(..)`.
    Error,

    /// The operation panicked while being polled.
    Panic,
}

#[derive(Debug)]
struct FailureInner {
    kind: FailureKind,
    error: anyhow::Error,
    occurred_at: DateTime<Utc>,
}

/// A failure raised inside a dispatched operation.
#[derive(Debug, Clone)]
pub struct Failure {
    inner: Arc<FailureInner>,
    launch_id: Option<LaunchId>,
}

impl Failure {
    pub fn from_error(error: impl Into<anyhow::Error>) -> Self {
        Self::new(FailureKind::Error, error.into())
    }

    /// Build a failure from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        Self::new(
            FailureKind::Panic,
            anyhow::anyhow!("operation panicked: {message}"),
        )
    }

    fn new(kind: FailureKind, error: anyhow::Error) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                kind,
                error,
                occurred_at: Utc::now(),
            }),
            launch_id: None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.inner.kind
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.inner.error
    }

    /// Look at the concrete error type, e.g. to react only to I/O errors.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.error.downcast_ref::<E>()
    }

    pub fn launch_id(&self) -> Option<LaunchId> {
        self.launch_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.inner.occurred_at
    }

    /// Both values originate from the same failing operation.
    pub fn same_origin(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn with_launch_id(mut self, launch_id: LaunchId) -> Self {
        self.launch_id = Some(launch_id);
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner.error)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
