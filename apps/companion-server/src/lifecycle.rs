//! Per-request lifecycle: `Received -> Paused -> Resumed -> Finished`.
//!
//! The middleware creates one [`RequestLifecycle`] per request and hands it to
//! handlers through request extensions. Handlers run their async work through
//! [`RequestLifecycle::run`], which pauses the request and races the work
//! against cancellation. The middleware resumes the request once the handler
//! has produced a response, and the response body finishes it when the
//! transfer ends, fails or is dropped by a departing client. Finishing
//! releases the keep-alive hold exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http_body::{Body as _, Frame, SizeHint};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::keepalive::HoldGuard;
use crate::responses::ServiceError;
use crate::AppState;

/// Header advertising how long the server expects to stay up after this request.
pub(crate) const ALIVE_FOR_FURTHER: &str = "x-alive-for-further";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    Received,
    Paused,
    Resumed,
    Finished,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum LifecycleError {
    #[error("cannot {action} a request in state {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: RequestState,
    },
}

struct Inner {
    state: Mutex<RequestState>,
    cancel: CancellationToken,
    hold: Mutex<Option<HoldGuard>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        if state != RequestState::Finished {
            warn!(?state, "request lifecycle dropped before finishing");
        }
    }
}

#[derive(Clone)]
pub(crate) struct RequestLifecycle {
    inner: Arc<Inner>,
}

impl RequestLifecycle {
    pub(crate) fn new(hold: HoldGuard) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RequestState::Received),
                cancel: CancellationToken::new(),
                hold: Mutex::new(Some(hold)),
            }),
        }
    }

    pub(crate) fn state(&self) -> RequestState {
        *self.lock_state()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn pause(&self) -> Result<(), LifecycleError> {
        self.transition("pause", RequestState::Received, RequestState::Paused)
    }

    pub(crate) fn resume(&self) -> Result<(), LifecycleError> {
        self.transition("resume", RequestState::Paused, RequestState::Resumed)
    }

    /// Move to `Finished` and release the keep-alive hold. Returns `false`
    /// when the request was already finished.
    pub(crate) fn finish(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state == RequestState::Finished {
                return false;
            }
            if *state != RequestState::Resumed {
                debug!(from = ?*state, "finishing request outside the resumed state");
            }
            *state = RequestState::Finished;
        }
        let hold = self
            .inner
            .hold
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(hold) = hold {
            hold.release();
        }
        trace!("request finished");
        true
    }

    /// Run `work` with the request paused, failing with `CANCELLED` if the
    /// request is cancelled first.
    pub(crate) async fn run<F, T>(&self, work: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match self.state() {
            RequestState::Received => {
                let _ = self.pause();
            }
            RequestState::Paused => {}
            state => {
                return Err(ServiceError::failed(format!(
                    "request already committed ({state:?})"
                )));
            }
        }
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(ServiceError::cancelled()),
            result = work => result,
        }
    }

    fn transition(
        &self,
        action: &'static str,
        from: RequestState,
        to: RequestState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(LifecycleError::InvalidTransition {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RequestState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// Cancels and finishes the request if the handler future is dropped.
struct AbortOnDrop(Option<RequestLifecycle>);

impl AbortOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.0.take() {
            debug!("request dropped before a response was produced");
            lifecycle.cancel();
            lifecycle.finish();
        }
    }
}

pub(crate) async fn lifecycle_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let lifecycle = RequestLifecycle::new(state.keep_alive().hold());
    req.extensions_mut().insert(lifecycle.clone());
    let guard = AbortOnDrop(Some(lifecycle.clone()));

    let mut response = next.run(req).await;
    guard.disarm();

    if lifecycle.state() == RequestState::Paused {
        if let Err(err) = lifecycle.resume() {
            warn!(%err, "failed to resume request");
        }
    }
    if let Some(value) = state
        .alive_for_further()
        .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok())
    {
        response.headers_mut().insert(ALIVE_FOR_FURTHER, value);
    }
    response.map(|body| Body::new(LifecycleBody::new(body, lifecycle)))
}

/// Response body that finishes its request when the transfer is over.
pub(crate) struct LifecycleBody {
    inner: Body,
    lifecycle: Option<RequestLifecycle>,
}

impl LifecycleBody {
    pub(crate) fn new(inner: Body, lifecycle: RequestLifecycle) -> Self {
        Self {
            inner,
            lifecycle: Some(lifecycle),
        }
    }

    fn complete(&mut self) {
        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.finish();
        }
    }
}

impl http_body::Body for LifecycleBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.complete(),
            Poll::Ready(Some(Err(err))) => {
                warn!(%err, "response body transfer failed");
                this.complete();
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LifecycleBody {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.take() {
            // Dropped mid-transfer means the peer went away.
            if !self.inner.is_end_stream() {
                lifecycle.cancel();
            }
            lifecycle.finish();
        }
    }
}
