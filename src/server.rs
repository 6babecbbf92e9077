//! HTTP server, request pipeline and graceful shutdown.
//!
//! # Pipeline
//!
//! Every request goes through the same fixed sequence:
//!
//! 1. Enrichment: query, cookies, client IP, request id.
//! 2. `onRequest` and `preParsing` hooks.
//! 3. Body buffering and parsing (POST / PUT / PATCH only).
//! 4. `preValidation` hooks, route lookup, `preHandler` hooks.
//! 5. Global middleware, then the route's handlers.
//! 6. On any error: `onError` hooks, then the error responder.
//! 7. Finalize, then `onResponse` hooks.
//!
//! Steps 2 to 5 run under one panic guard and the optional request deadline.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body::Body;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span};

use crate::app::{App, Frozen};
use crate::error::Error;
use crate::handler::{self, Next};
use crate::hooks::Phase;
use crate::request::Request;
use crate::response::Response;

/// A frozen application, ready to serve.
///
/// Cheap to clone: every clone shares the same router, middleware, hooks and
/// decorations.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Frozen>,
}

impl Server {
    pub fn new(app: App) -> Self {
        Self { inner: Arc::new(app.freeze()) }
    }

    /// Serves on `listener` until SIGTERM or Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serves on `listener` until `signal` resolves, then drains in-flight
    /// connections.
    pub async fn serve_with_shutdown<S>(self, listener: TcpListener, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, pid = std::process::id(), "azura listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting immediately.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let server = self.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let server = server.clone();
                            async move {
                                Ok::<_, std::convert::Infallible>(server.handle(req, remote_addr).await)
                            }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("azura stopped");
        Ok(())
    }

    /// Runs one request through the full pipeline and returns the response.
    ///
    /// Never fails: every error becomes a JSON error response.
    pub async fn handle<B>(&self, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let mut request = Request::from_parts(parts, remote_addr, Arc::clone(&self.inner.decorations));
        let mut response = Response::new();

        let span = info_span!(
            "request",
            id = %request.id(),
            method = %request.method(),
            path = %request.path(),
        );

        async move {
            let started = Instant::now();
            let app = &self.inner;

            let outcome = handler::guarded(
                process(app, &mut request, &mut response, body),
                app.config.request_timeout(),
            )
            .await;

            if let Err(err) = outcome {
                let answered = response.is_sent();
                request.error = Some(err);
                app.hooks.run_on_error(&mut request, &mut response).await;
                if let Some(err) = request.error.take() {
                    if !answered && response.is_sent() {
                        debug!(error = %err, "error answered by an onError hook");
                    } else {
                        handler::respond_with_error(&err, &mut response);
                    }
                }
            }

            response.finalize();
            response.set("x-request-id", &request.id().to_string());
            app.hooks.run_on_response(&mut request, &mut response).await;

            info!(
                status = response.status_code().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request completed"
            );
            response.into_inner()
        }
        .instrument(span)
        .await
    }
}

/// Steps 2 to 5 of the pipeline. Returns early, without error, as soon as
/// something has sent the response.
async fn process<B>(app: &Frozen, req: &mut Request, res: &mut Response, body: B) -> Result<(), Error>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    app.hooks.run(Phase::OnRequest, req, res).await?;
    if res.is_sent() {
        return Ok(());
    }
    app.hooks.run(Phase::PreParsing, req, res).await?;
    if res.is_sent() {
        return Ok(());
    }

    if req.expects_body() {
        req.read_body(body).await;
    }

    app.hooks.run(Phase::PreValidation, req, res).await?;
    if res.is_sent() {
        return Ok(());
    }

    let matched = app.router.find(req.method(), req.path())?;
    req.params = matched.params;

    app.hooks.run(Phase::PreHandler, req, res).await?;
    if res.is_sent() {
        return Ok(());
    }

    Next::new(&app.middleware, matched.handlers).run(req, res).await
}

/// Resolves on the first shutdown signal the process receives.
///
/// SIGTERM (orchestrators) and SIGINT (Ctrl-C) on Unix; Ctrl-C elsewhere.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
