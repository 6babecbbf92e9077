//! Lifecycle hooks.
//!
//! A hook is an async callback attached to a named [`Phase`] of the request
//! lifecycle. Phases run in this order for every request:
//!
//! ```text
//! onRequest → preParsing → (body parsed) → preValidation → (route lookup)
//!           → preHandler → (middleware + handlers) → onResponse
//!
//! any error ───────────────→ onError → (error responder) → onResponse
//! ```
//!
//! Within a phase, callbacks run in registration order. In the four request
//! phases a callback that returns `Err` short-circuits to the error responder,
//! and a callback that sends a response ends processing there.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, warn};

use crate::error::Error;
use crate::handler::{self, BoxFuture};
use crate::request::Request;
use crate::response::Response;

/// A named point in the request lifecycle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    OnRequest,
    PreParsing,
    PreValidation,
    PreHandler,
    OnResponse,
    OnError,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Self::OnRequest,
        Self::PreParsing,
        Self::PreValidation,
        Self::PreHandler,
        Self::OnResponse,
        Self::OnError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnRequest     => "onRequest",
            Self::PreParsing    => "preParsing",
            Self::PreValidation => "preValidation",
            Self::PreHandler    => "preHandler",
            Self::OnResponse    => "onResponse",
            Self::OnError       => "onError",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| Error::UnknownPhase(s.to_owned()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle callback.
pub trait Hook: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Result<(), Error>>;
}

pub(crate) type BoxedHook = Arc<dyn Hook>;

struct FnHook<F>(F);

impl<F> Hook for FnHook<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(req, res)
    }
}

/// Boxes a closure into a hook.
pub(crate) fn hook<F>(f: F) -> BoxedHook
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHook(f))
}

/// Per-phase ordered callback lists.
#[derive(Default)]
pub(crate) struct Hooks {
    phases: [Vec<BoxedHook>; 6],
}

impl Hooks {
    pub(crate) fn add(&mut self, phase: Phase, hook: BoxedHook) {
        self.phases[phase.index()].push(hook);
    }

    pub(crate) fn count(&self, phase: Phase) -> usize {
        self.phases[phase.index()].len()
    }

    /// Per-phase lengths, for [`Hooks::truncate`].
    pub(crate) fn lens(&self) -> [usize; 6] {
        self.phases.each_ref().map(Vec::len)
    }

    /// Drops callbacks added after `lens` was taken.
    pub(crate) fn truncate(&mut self, lens: [usize; 6]) {
        for (callbacks, len) in self.phases.iter_mut().zip(lens) {
            callbacks.truncate(len);
        }
    }

    /// Runs a request phase. Stops at the first error, or as soon as a
    /// callback sends the response.
    pub(crate) async fn run(&self, phase: Phase, req: &mut Request, res: &mut Response) -> Result<(), Error> {
        for hook in &self.phases[phase.index()] {
            hook.call(req, res).await?;
            if res.is_sent() {
                break;
            }
        }
        Ok(())
    }

    /// Runs `onError` callbacks. A failing or panicking callback is logged
    /// and stops the rest; a callback that sends the response also stops the
    /// rest.
    pub(crate) async fn run_on_error(&self, req: &mut Request, res: &mut Response) {
        for hook in &self.phases[Phase::OnError.index()] {
            match call_caught(hook, req, res).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "onError hook failed");
                    break;
                }
                Err(panic) => {
                    error!(panic = %panic, "onError hook panicked");
                    break;
                }
            }
            if res.is_sent() {
                break;
            }
        }
    }

    /// Runs `onResponse` callbacks. Every callback runs; failures and panics
    /// are logged.
    pub(crate) async fn run_on_response(&self, req: &mut Request, res: &mut Response) {
        for hook in &self.phases[Phase::OnResponse.index()] {
            match call_caught(hook, req, res).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "onResponse hook failed"),
                Err(panic) => error!(panic = %panic, "onResponse hook panicked"),
            }
        }
    }
}

/// Calls `hook` with panics caught, the call itself included. `Err` carries
/// the panic message.
async fn call_caught(hook: &BoxedHook, req: &mut Request, res: &mut Response) -> Result<Result<(), Error>, String> {
    AssertUnwindSafe(async { hook.call(req, res).await })
        .catch_unwind()
        .await
        .map_err(|panic| handler::panic_message(panic.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_parse_from_names() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!(matches!("onSend".parse::<Phase>(), Err(Error::UnknownPhase(name)) if name == "onSend"));
    }

    #[test]
    fn hooks_are_stored_per_phase() {
        let mut hooks = Hooks::default();
        let noop = hook(|_req, _res| Box::pin(async { Ok::<(), Error>(()) }));
        hooks.add(Phase::OnRequest, Arc::clone(&noop));
        hooks.add(Phase::OnRequest, Arc::clone(&noop));
        hooks.add(Phase::OnError, noop);
        assert_eq!(hooks.count(Phase::OnRequest), 2);
        assert_eq!(hooks.count(Phase::OnError), 1);
        assert_eq!(hooks.count(Phase::PreHandler), 0);
    }
}
