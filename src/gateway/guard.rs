//! Panic containment around the forwarding call.
//!
//! # Responsibilities
//! - Keep a panic raised while forwarding from taking down the process
//! - Let the designated abort signal pass through untouched
//!
//! # Design Decisions
//! - The guard wraps the entire forward future: it is established before
//!   the forward starts executing, so a failure at any point during the
//!   call is observed
//! - A panic payload carrying [`ResponseAborted`] is mapped back to
//!   [`ForwardError::Aborted`] and never logged as an error

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::http::Response;
use futures_util::FutureExt;

use crate::gateway::forwarder::ForwardError;

/// Marker panic payload: the response was already partially written and
/// further writes are unsafe. Expected behavior, not a defect.
#[derive(Debug)]
pub struct ResponseAborted;

/// Result of running a forward under the guard.
pub enum GuardedForward {
    /// The forward ran to completion (possibly with a transport error or
    /// the abort signal).
    Completed(Result<Response<Body>, ForwardError>),
    /// The forward panicked; the payload message is carried for logging.
    Panicked(String),
}

/// Run `forward` with panic recovery scoped around the entire call.
pub async fn guard_forward<F>(forward: F) -> GuardedForward
where
    F: Future<Output = Result<Response<Body>, ForwardError>>,
{
    match AssertUnwindSafe(forward).catch_unwind().await {
        Ok(result) => GuardedForward::Completed(result),
        Err(payload) => {
            if payload.is::<ResponseAborted>() {
                return GuardedForward::Completed(Err(ForwardError::Aborted));
            }
            GuardedForward::Panicked(panic_message(payload))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
