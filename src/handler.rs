//! Handler trait, type erasure and the middleware/handler chain.
//!
//! # One shape for every chain element
//!
//! Global middleware and route handlers are the same thing: an async function
//! of `(&mut Request, &mut Response, Next)`. The chain for one request is the
//! global middleware (registration order) followed by the matched route's
//! handlers (registration order). An element can:
//!
//! - call `next.run(req, res).await` to advance, and keep working after it
//!   returns,
//! - return `Err(e)`, or propagate one with `?`, to short-circuit to the
//!   error responder,
//! - send a response and return `Ok(())` without touching `next`.
//!
//! ```text
//! handler(|req, res, next| Box::pin(async move { … }))   ← user writes this
//!        ↓
//! Arc::new(FnHandler(closure))                          ← BoxedHandler
//!        ↓  stored in App::middleware / the route trie
//! next.run(req, res)  at request time                   ← one vtable call
//! ```
//!
//! Closures must return a [`BoxFuture`]; the higher-ranked bound on
//! [`handler`] lets the compiler infer the borrowed argument types, so the
//! `Box::pin(async move { … })` body needs no annotations.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One element of a request chain.
///
/// Implement it on your own types for stateful middleware; use [`handler`]
/// for closures.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(req, res, next)
    }
}

/// Boxes a closure into a [`BoxedHandler`].
///
/// ```rust
/// use azura::handler;
/// use serde_json::json;
///
/// let hello = handler(|_req, res, _next| Box::pin(async move {
///     res.json(&json!({ "message": "hi" }))
/// }));
/// ```
pub fn handler<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

// ── Chain registration input ──────────────────────────────────────────────────

/// Anything that can be registered as the handler list of a route.
pub trait IntoHandlers {
    fn into_handlers(self) -> Vec<BoxedHandler>;
}

impl IntoHandlers for BoxedHandler {
    fn into_handlers(self) -> Vec<BoxedHandler> { vec![self] }
}

impl IntoHandlers for Vec<BoxedHandler> {
    fn into_handlers(self) -> Vec<BoxedHandler> { self }
}

impl<const N: usize> IntoHandlers for [BoxedHandler; N] {
    fn into_handlers(self) -> Vec<BoxedHandler> { self.into() }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of the chain after the current element.
///
/// Consumed by [`Next::run`], so an element advances the chain at most once.
pub struct Next<'a> {
    middleware: &'a [BoxedHandler],
    handlers: &'a [BoxedHandler],
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [BoxedHandler], handlers: &'a [BoxedHandler]) -> Self {
        Self { middleware, handlers }
    }

    /// Runs the remaining chain. Resolves to `Ok(())` when nothing is left.
    pub fn run<'b>(
        self,
        req: &'b mut Request,
        res: &'b mut Response,
    ) -> BoxFuture<'b, Result<(), Error>>
    where
        'a: 'b,
    {
        if let Some((first, rest)) = self.middleware.split_first() {
            return first.call(req, res, Next::new(rest, self.handlers));
        }
        match self.handlers.split_first() {
            Some((first, rest)) => first.call(req, res, Next::new(&[], rest)),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// Number of chain elements still ahead.
    pub fn remaining(&self) -> usize {
        self.middleware.len() + self.handlers.len()
    }
}

// ── Guarded execution ─────────────────────────────────────────────────────────

/// Awaits `fut`, converting a panic into [`Error::Panic`] and, when a
/// deadline is given, expiry into [`Error::Timeout`].
pub(crate) async fn guarded<F>(fut: F, deadline: Option<Duration>) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>>,
{
    let caught = AssertUnwindSafe(fut).catch_unwind();
    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, caught).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(Error::Timeout(limit)),
        },
        None => caught.await,
    };
    outcome.unwrap_or_else(|panic| Err(Error::Panic(panic_message(panic.as_ref()))))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ── Error responder ───────────────────────────────────────────────────────────

/// Writes the JSON error envelope for `err`.
///
/// Does nothing but log when a response was already sent.
pub(crate) fn respond_with_error(err: &Error, res: &mut Response) {
    if err.is_expected() {
        debug!(status = %err.status_code(), "{err}");
    } else {
        error!(error = %err, "unhandled error in request chain");
    }

    if res.is_sent() {
        warn!(error = %err, "response already sent, dropping error response");
        return;
    }

    let payload = err.payload();
    if let Err(e) = res.status(err.status_code()).json(&payload) {
        error!(error = %e, "failed to write error response");
    }
}
