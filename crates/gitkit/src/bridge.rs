//! Async call bridge.
//!
//! Every host-facing operation returns a [`PendingCall`] immediately and
//! does its work on a background tokio task. The task settles the call
//! through a [`Resolver`], which is consumed by `resolve`/`reject`, so a
//! call can be settled at most once. If the task panics or is dropped
//! before settling, the call is rejected instead of hanging.

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::Error;

/// Success value of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallValue {
    Text(String),
    List(Vec<String>),
}

impl CallValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CallValue::Text(text) => Some(text),
            CallValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            CallValue::List(items) => Some(items),
            CallValue::Text(_) => None,
        }
    }
}

impl From<String> for CallValue {
    fn from(text: String) -> Self {
        CallValue::Text(text)
    }
}

impl From<&str> for CallValue {
    fn from(text: &str) -> Self {
        CallValue::Text(text.to_string())
    }
}

impl From<Vec<String>> for CallValue {
    fn from(items: Vec<String>) -> Self {
        CallValue::List(items)
    }
}

/// Failure value of a call: the message handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub message: String,
}

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Rejection {}

impl From<Error> for Rejection {
    fn from(error: Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Terminal outcome of a call.
pub type Outcome = std::result::Result<CallValue, Rejection>;

/// Settles exactly one [`PendingCall`].
#[must_use = "dropping a Resolver rejects its call"]
pub struct Resolver {
    operation: &'static str,
    tx: oneshot::Sender<Outcome>,
}

impl Resolver {
    pub fn resolve(self, value: impl Into<CallValue>) {
        self.settle(Ok(value.into()));
    }

    pub fn reject(self, message: impl Into<String>) {
        self.settle(Err(Rejection::new(message)));
    }

    pub fn settle(self, outcome: Outcome) {
        #[cfg(feature = "logging")]
        if let Err(rejection) = &outcome {
            tracing::warn!(
                operation = self.operation,
                error = %crate::logging::sanitize_for_log(&rejection.message),
                "call rejected"
            );
        } else {
            tracing::debug!(operation = self.operation, "call resolved");
        }
        // The host may have dropped its PendingCall; nobody is left to tell.
        let _ = self.tx.send(outcome);
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Handle to an in-flight call. Await it, or pass callbacks to
/// [`PendingCall::settle`].
#[must_use = "a PendingCall does nothing visible unless awaited or settled"]
pub struct PendingCall {
    operation: &'static str,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    /// A fresh call and the resolver that settles it.
    pub fn channel(operation: &'static str) -> (Resolver, PendingCall) {
        let (tx, rx) = oneshot::channel();
        (Resolver { operation, tx }, PendingCall { operation, rx })
    }

    /// A call that is already rejected.
    pub fn rejected(operation: &'static str, error: Error) -> Self {
        let (resolver, call) = Self::channel(operation);
        resolver.reject(error.to_string());
        call
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Wait for the outcome and hand it to exactly one of the callbacks.
    pub async fn settle<R, J>(self, resolve: R, reject: J)
    where
        R: FnOnce(CallValue),
        J: FnOnce(Rejection),
    {
        match self.await {
            Ok(value) => resolve(value),
            Err(rejection) => reject(rejection),
        }
    }
}

impl Future for PendingCall {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Rejection::from(Error::Internal(format!(
                "{} ended without a result",
                self.operation
            ))))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// Spawns call bodies onto a tokio runtime.
#[derive(Clone, Default)]
pub struct Bridge {
    handle: Option<Handle>,
}

impl Bridge {
    /// Use the runtime current at each `spawn`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always spawn onto `handle`, so calls can be made from threads
    /// outside any runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Run `work` in the background and return the call it settles.
    ///
    /// A panic inside `work` rejects the call with an internal error; the
    /// panic payload is logged but never sent to the host.
    pub fn spawn<F, T>(&self, operation: &'static str, work: F) -> PendingCall
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Into<CallValue> + Send + 'static,
    {
        let Some(handle) = self.handle.clone().or_else(|| Handle::try_current().ok()) else {
            return PendingCall::rejected(
                operation,
                Error::Internal("no async runtime available".to_string()),
            );
        };

        let (resolver, call) = PendingCall::channel(operation);
        handle.spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(value)) => Ok(value.into()),
                Ok(Err(error)) => Err(Rejection::from(error)),
                Err(_payload) => {
                    #[cfg(feature = "logging")]
                    tracing::error!(
                        operation,
                        panic = panic_message(&*_payload),
                        "call panicked"
                    );
                    Err(Rejection::from(Error::Internal(format!(
                        "{} failed unexpectedly",
                        operation
                    ))))
                }
            };
            resolver.settle(outcome);
        });
        call
    }
}

#[cfg(feature = "logging")]
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
