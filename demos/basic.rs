//! Minimal azura example: JSON endpoints, a timing middleware and a hook.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:3000/missing

use std::time::Instant;

use azura::{App, Config, Error, Phase, StatusCode, handler};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut app = App::with_config(Config::from_env()?);

    // Runs around every routed request.
    app.use_middleware(handler(|req, res, next| Box::pin(async move {
        let started = Instant::now();
        next.run(req, res).await?;
        res.set("x-response-time", &format!("{}us", started.elapsed().as_micros()));
        Ok::<(), Error>(())
    })));

    app.on_hook(Phase::OnRequest, |req, _res| Box::pin(async move {
        tracing::info!(ip = req.ip(), "incoming");
        Ok(())
    }));

    app.get("/users/:id", handler(|req, res, _next| Box::pin(async move {
        let id = req.param("id").unwrap_or_default().to_owned();
        res.json(&json!({ "id": id, "name": "alice" }))
    })));

    app.post("/users", handler(|req, res, _next| Box::pin(async move {
        let Some(name) = req.body().get("name").and_then(|v| v.as_str()) else {
            return Err(Error::status(StatusCode::BAD_REQUEST, "name is required"));
        };
        res.status(StatusCode::CREATED)
            .location("/users/99")
            .json(&json!({ "id": 99, "name": name }))
    })));

    app.listen(3000).await
}
