//! # azura
//!
//! A small HTTP framework: trie routing, Express-style handler chains,
//! lifecycle hooks and dependency-aware plugins on top of hyper.
//!
//! ## What it does
//!
//! - Trie routing with `:param` segments, literal segments first
//! - Request enrichment: query, cookies, parsed JSON / form bodies, client IP
//! - Onion middleware via [`Next`], plus per-route handler chains
//! - One error responder: every failure becomes a JSON error response
//! - Lifecycle hooks, plugins with dependencies, typed app decorations
//! - Graceful shutdown, optional per-request deadline, optional multi-process
//!   cluster mode with worker restart
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use azura::{App, Error, StatusCode, handler};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut app = App::new();
//!
//!     app.get("/users/:id", handler(|req, res, _next| Box::pin(async move {
//!         let id = req.param("id").unwrap_or_default().to_owned();
//!         res.json(&json!({ "id": id }))
//!     })));
//!
//!     app.post("/users", handler(|req, res, _next| Box::pin(async move {
//!         if req.body().get("name").is_none() {
//!             return Err(Error::status(StatusCode::BAD_REQUEST, "name is required"));
//!         }
//!         res.status(StatusCode::CREATED).json(req.body())
//!     })));
//!
//!     app.listen(3000).await
//! }
//! ```

mod adapter;
mod app;
mod config;
mod error;
mod handler;
mod hooks;
mod parse;
mod plugin;
mod request;
mod response;
mod router;
mod server;
mod supervisor;

pub use adapter::{Database, DbAdapter};
pub use app::App;
pub use config::Config;
pub use error::{Error, HttpError};
pub use handler::{BoxFuture, BoxedHandler, Handler, IntoHandlers, Next, handler};
pub use hooks::{Hook, Phase};
pub use plugin::{Plugin, PluginOptions};
pub use request::Request;
pub use response::{Body, CookieOptions, Response, SameSite};
pub use server::Server;
pub use supervisor::{Supervisor, WORKER_ENV, worker_id};

pub use http::{Method, StatusCode};
