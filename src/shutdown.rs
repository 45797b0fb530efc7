//! In-flight tracking and bounded graceful drain.
//!
//! Each listener owns one [`ShutdownCoordinator`].  Its gate middleware
//! registers every admitted request with a `TaskTracker` token.  The token
//! rides inside the response body, so a streamed download stays in flight
//! until its last byte is sent, the body errors, or the client goes away.
//! Once draining starts the gate refuses new work immediately and the
//! coordinator waits, up to a timeout, for the tracked requests to finish.
//!
//! States: `Running -> Draining -> Stopped`.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, BodyDataStream, Bytes, HttpBody};
use axum::extract::{Request, State};
use futures::Stream;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::errors::GatewayError;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownState::Running => "running",
            ShutdownState::Draining => "draining",
            ShutdownState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Drain failure.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{listener} listener drain timed out after {timeout:?} with {in_flight} request(s) in flight")]
    Timeout {
        listener: &'static str,
        timeout: Duration,
        in_flight: usize,
    },
}

struct Inner {
    /// Listener name used in logs.
    name: &'static str,
    state: AtomicU8,
    tracker: TaskTracker,
}

/// Tracks in-flight requests for one listener and drives its drain.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

/// Registration of one admitted request. Dropping it deregisters.
pub struct InFlightGuard {
    _token: TaskTrackerToken,
}

impl ShutdownCoordinator {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: AtomicU8::new(RUNNING),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        match self.inner.state.load(Ordering::Acquire) {
            RUNNING => ShutdownState::Running,
            DRAINING => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }

    /// Number of requests currently registered.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Admit one unit of work, or `None` once draining has begun.
    pub fn enter(&self) -> Option<InFlightGuard> {
        // Register before checking, so a concurrent drain either sees this
        // token or this call sees the state change.
        let token = self.inner.tracker.token();
        if self.inner.state.load(Ordering::Acquire) != RUNNING {
            drop(token);
            return None;
        }
        Some(InFlightGuard { _token: token })
    }

    /// Stop admitting work and wait up to `timeout` for in-flight requests.
    ///
    /// Always leaves the coordinator `Stopped`.  A timeout is returned to the
    /// caller, which is expected to escalate.
    pub async fn drain(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let _ = self.inner.state.compare_exchange(
            RUNNING,
            DRAINING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.tracker.close();
        info!(
            listener = self.inner.name,
            in_flight = self.in_flight(),
            "Draining in-flight requests"
        );

        let waited = tokio::time::timeout(timeout, self.inner.tracker.wait()).await;
        self.inner.state.store(STOPPED, Ordering::Release);

        match waited {
            Ok(()) => {
                info!(listener = self.inner.name, "Drain complete");
                Ok(())
            }
            Err(_) => {
                let in_flight = self.in_flight();
                warn!(listener = self.inner.name, in_flight = in_flight, "Drain timed out");
                Err(ShutdownError::Timeout {
                    listener: self.inner.name,
                    timeout,
                    in_flight,
                })
            }
        }
    }
}

/// Middleware: refuse new work while draining, otherwise track the request.
pub async fn shutdown_gate(
    State(coordinator): State<ShutdownCoordinator>,
    req: Request,
    next: Next,
) -> Response {
    let Some(guard) = coordinator.enter() else {
        return GatewayError::Unavailable.into_response();
    };
    let response = next.run(req).await;
    // Buffered bodies are complete already; only streams outlive the handler.
    if response.body().size_hint().exact().is_some() {
        return response;
    }
    let (parts, body) = response.into_parts();
    let tracked = TrackedBody {
        inner: body.into_data_stream(),
        guard: Some(guard),
    };
    Response::from_parts(parts, Body::from_stream(tracked))
}

/// Response body that holds the request's [`InFlightGuard`] until the
/// stream ends, fails, or is dropped.
struct TrackedBody {
    inner: BodyDataStream,
    guard: Option<InFlightGuard>,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.guard = None;
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        Stream::size_hint(&self.inner)
    }
}
