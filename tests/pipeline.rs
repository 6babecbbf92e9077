//! End-to-end request pipeline tests, driven through `Server::handle`
//! without a socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use azura::{App, BoxFuture, Config, Error, Hook, Phase, Request, Response, Server, StatusCode, handler};
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use serde_json::{Value, json};

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

fn peer() -> SocketAddr {
    "10.0.0.7:51000".parse().unwrap()
}

async fn send(server: &Server, req: http::Request<Full<Bytes>>) -> Reply {
    let res = server.handle(req, peer()).await;
    let (parts, body) = res.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.collect().await.unwrap().to_bytes(),
    }
}

async fn get(server: &Server, uri: &str) -> Reply {
    let req = http::Request::get(uri).body(Full::default()).unwrap();
    send(server, req).await
}

async fn post(server: &Server, uri: &str, content_type: &str, body: &'static str) -> Reply {
    let req = http::Request::post(uri)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    send(server, req).await
}

fn hello_app() -> App {
    let mut app = App::new();
    app.get("/hello", handler(|_req, res, _next| Box::pin(async move {
        res.json(&json!({ "message": "hi" }))
    })));
    app
}

#[tokio::test]
async fn get_returns_json() {
    let server = Server::new(hello_app());
    let reply = get(&server, "/hello").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers["content-type"], "application/json");
    assert_eq!(reply.json(), json!({ "message": "hi" }));
}

#[tokio::test]
async fn every_response_carries_a_request_id() {
    let server = Server::new(hello_app());
    let first = get(&server, "/hello").await;
    let second = get(&server, "/nope").await;

    let a = first.headers["x-request-id"].to_str().unwrap().to_owned();
    let b = second.headers["x-request-id"].to_str().unwrap().to_owned();
    assert_eq!(a.len(), 36);
    assert_ne!(a, b);
}

#[tokio::test]
async fn unknown_route_is_404_with_message() {
    let server = Server::new(hello_app());
    let reply = get(&server, "/missing").await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json(), json!({ "message": "Route not found" }));

    // Wrong method on a known path is also a miss.
    let reply = post(&server, "/hello", "application/json", "{}").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_body_and_params_reach_the_handler() {
    let mut app = App::new();
    app.post("/users/:id", handler(|req, res, _next| Box::pin(async move {
        let echo = json!({ "id": req.param("id"), "body": req.body() });
        res.status(StatusCode::CREATED).json(&echo)
    })));
    let server = Server::new(app);

    let reply = post(&server, "/users/42", "application/json", r#"{"name":"alice"}"#).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.json(), json!({ "id": "42", "body": { "name": "alice" } }));
}

#[tokio::test]
async fn malformed_json_becomes_an_empty_body() {
    let mut app = App::new();
    app.post("/echo", handler(|req, res, _next| Box::pin(async move {
        let body = req.body().clone();
        res.json(&body)
    })));
    let server = Server::new(app);

    let reply = post(&server, "/echo", "application/json", "{not json").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({}));
}

#[tokio::test]
async fn form_bodies_are_parsed() {
    let mut app = App::new();
    app.post("/login", handler(|req, res, _next| Box::pin(async move {
        let body = req.body().clone();
        res.json(&body)
    })));
    let server = Server::new(app);

    let reply = post(&server, "/login", "application/x-www-form-urlencoded", "user=bob&pass=a%20b").await;
    assert_eq!(reply.json(), json!({ "user": "bob", "pass": "a b" }));
}

#[tokio::test]
async fn query_cookies_and_forwarded_ip_are_exposed() {
    let mut app = App::new();
    app.get("/whoami", handler(|req, res, _next| Box::pin(async move {
        let out = json!({
            "page": req.query("page"),
            "session": req.cookie("sid"),
            "ip": req.ip(),
        });
        res.json(&out)
    })));
    let server = Server::new(app);

    let req = http::Request::get("/whoami?page=2&page=3")
        .header("cookie", "sid=abc%3D; theme=dark")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Full::default())
        .unwrap();
    let reply = send(&server, req).await;
    assert_eq!(reply.json(), json!({ "page": "2", "session": "abc=", "ip": "203.0.113.9" }));

    let reply = get(&server, "/whoami").await;
    assert_eq!(reply.json()["ip"], "10.0.0.7");
}

#[tokio::test]
async fn handler_that_sends_stops_the_chain() {
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);

    let mut app = App::new();
    app.get("/guarded", vec![
        handler(|_req, res, _next| Box::pin(async move {
            res.status(StatusCode::UNAUTHORIZED).json(&json!({ "error": "nope" }))
        })),
        handler(move |_req, res, _next| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                res.send("unreachable")
            })
        }),
    ]);
    let server = Server::new(app);

    let reply = get(&server, "/guarded").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reached.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handlers_advance_with_next() {
    let mut app = App::new();
    app.get("/chain", [
        handler(|req, res, next| Box::pin(async move {
            req.locals_mut().insert(7u32);
            next.run(req, res).await
        })),
        handler(|req, res, _next| Box::pin(async move {
            let seen = req.locals().get::<u32>().copied();
            res.json(&json!({ "seen": seen }))
        })),
    ]);
    let server = Server::new(app);

    assert_eq!(get(&server, "/chain").await.json(), json!({ "seen": 7 }));
}

#[tokio::test]
async fn middleware_wraps_handlers() {
    let mut app = hello_app();
    app.use_middleware(handler(|req, res, next| Box::pin(async move {
        next.run(req, res).await?;
        res.set("x-wrapped", "yes");
        Ok::<(), Error>(())
    })));
    let server = Server::new(app);

    let reply = get(&server, "/hello").await;
    assert_eq!(reply.headers["x-wrapped"], "yes");
    assert_eq!(reply.json(), json!({ "message": "hi" }));

    // Middleware only runs for routed requests.
    let reply = get(&server, "/missing").await;
    assert!(reply.headers.get("x-wrapped").is_none());
}

#[tokio::test]
async fn middleware_error_skips_the_rest_of_the_chain() {
    let later_middleware = Arc::new(AtomicUsize::new(0));
    let route_handler = Arc::new(AtomicUsize::new(0));

    let mut app = App::new();
    app.use_middleware(handler(|_req, _res, _next| Box::pin(async move {
        Err(Error::status(StatusCode::FORBIDDEN, "no"))
    })));
    let calls = Arc::clone(&later_middleware);
    app.use_middleware(handler(move |req, res, next| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { next.run(req, res).await })
    }));
    let calls = Arc::clone(&route_handler);
    app.get("/guarded", handler(move |_req, res, _next| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { res.send("secret") })
    }));
    let server = Server::new(app);

    let reply = get(&server, "/guarded").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json(), json!({ "error": "no" }));
    assert_eq!(later_middleware.load(Ordering::SeqCst), 0);
    assert_eq!(route_handler.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn explicit_http_errors_keep_their_payload() {
    let mut app = App::new();
    app.get("/teapot", handler(|_req, _res, _next| Box::pin(async move {
        Err(Error::http(StatusCode::IM_A_TEAPOT, json!({ "error": "short and stout", "code": 418 })))
    })));
    app.get("/plain", handler(|_req, _res, _next| Box::pin(async move {
        Err(Error::msg("database unavailable"))
    })));
    let server = Server::new(app);

    let reply = get(&server, "/teapot").await;
    assert_eq!(reply.status, StatusCode::IM_A_TEAPOT);
    assert_eq!(reply.json(), json!({ "error": "short and stout", "code": 418 }));

    let reply = get(&server, "/plain").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.json(), json!({ "error": "database unavailable" }));
}

#[tokio::test]
async fn panics_become_500() {
    let mut app = App::new();
    app.get("/boom", handler(|req, _res, _next| Box::pin(async move {
        if req.path() == "/boom" {
            panic!("kaboom");
        }
        Ok(())
    })));
    let server = Server::new(app);

    let reply = get(&server, "/boom").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.json(), json!({ "error": "Internal Server Error" }));
}

#[tokio::test]
async fn slow_requests_hit_the_deadline() {
    let config = Config { request_timeout_ms: Some(20), ..Config::default() };
    let mut app = App::with_config(config);
    app.get("/slow", handler(|_req, res, _next| Box::pin(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        res.send("late")
    })));
    let server = Server::new(app);

    let reply = get(&server, "/slow").await;
    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn unsent_response_is_flushed_empty() {
    let mut app = App::new();
    app.get("/quiet", handler(|_req, res, _next| Box::pin(async move {
        res.set("x-touched", "1");
        Ok(())
    })));
    let server = Server::new(app);

    let reply = get(&server, "/quiet").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_empty());
    assert_eq!(reply.headers["x-touched"], "1");
}

#[tokio::test]
async fn hooks_run_in_lifecycle_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = hello_app();

    for phase in [Phase::OnResponse, Phase::PreHandler, Phase::OnRequest, Phase::PreValidation, Phase::PreParsing] {
        let log = Arc::clone(&log);
        app.on_hook(phase, move |_req, _res| {
            log.lock().unwrap().push(phase.as_str());
            Box::pin(async { Ok(()) })
        });
    }
    let server = Server::new(app);

    get(&server, "/hello").await;
    assert_eq!(*log.lock().unwrap(), vec![
        "onRequest",
        "preParsing",
        "preValidation",
        "preHandler",
        "onResponse",
    ]);
}

#[tokio::test]
async fn hook_can_answer_early() {
    let mut app = hello_app();
    app.on_hook(Phase::OnRequest, |req, res| Box::pin(async move {
        if req.header("authorization").is_none() {
            res.status(StatusCode::UNAUTHORIZED).json(&json!({ "error": "login first" }))?;
        }
        Ok::<(), Error>(())
    }));
    let server = Server::new(app);

    let reply = get(&server, "/hello").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json(), json!({ "error": "login first" }));
}

#[tokio::test]
async fn hook_errors_go_through_on_error() {
    let seen = Arc::new(Mutex::new(None));
    let mut app = hello_app();

    app.on_hook(Phase::PreHandler, |_req, _res| Box::pin(async move {
        Err(Error::status(StatusCode::FORBIDDEN, "blocked"))
    }));
    let recorder = Arc::clone(&seen);
    app.on_hook(Phase::OnError, move |req, _res| {
        *recorder.lock().unwrap() = req.error().map(|e| e.status_code());
        Box::pin(async { Ok(()) })
    });
    let server = Server::new(app);

    let reply = get(&server, "/hello").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json(), json!({ "error": "blocked" }));
    assert_eq!(*seen.lock().unwrap(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn on_error_hook_can_replace_the_error_response() {
    let mut app = App::new();
    app.on_hook(Phase::OnError, |req, res| Box::pin(async move {
        if matches!(req.error(), Some(Error::RouteNotFound)) {
            res.status(StatusCode::NOT_FOUND).send("custom not found")?;
        }
        Ok::<(), Error>(())
    }));
    let server = Server::new(app);

    let reply = get(&server, "/anything").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(&reply.body[..], b"custom not found");
}

#[tokio::test]
async fn panicking_on_error_hook_falls_back_to_the_error_response() {
    let mut app = hello_app();
    app.on_hook(Phase::OnError, |req, _res| Box::pin(async move {
        if req.error().is_some() {
            panic!("error reporter crashed");
        }
        Ok::<(), Error>(())
    }));
    let server = Server::new(app);

    let reply = get(&server, "/missing").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json(), json!({ "message": "Route not found" }));
    assert!(reply.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn panicking_on_response_hook_keeps_the_response() {
    let after = Arc::new(AtomicUsize::new(0));
    let mut app = hello_app();
    app.on_hook(Phase::OnResponse, |req, _res| Box::pin(async move {
        if req.path() == "/hello" {
            panic!("access log crashed");
        }
        Ok::<(), Error>(())
    }));
    let calls = Arc::clone(&after);
    app.on_hook(Phase::OnResponse, move |_req, _res| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    });
    let server = Server::new(app);

    let reply = get(&server, "/hello").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({ "message": "hi" }));
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

/// Numbers requests as they arrive.
struct RequestCounter {
    seen: Arc<AtomicUsize>,
}

impl Hook for RequestCounter {
    fn call<'a>(&'a self, _req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Result<(), Error>> {
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            res.set("x-request-number", &n.to_string());
            Ok(())
        })
    }
}

#[tokio::test]
async fn hook_trait_objects_keep_their_state() {
    let seen = Arc::new(AtomicUsize::new(0));
    let mut app = hello_app();
    app.add_hook(Phase::OnRequest, RequestCounter { seen: Arc::clone(&seen) });
    let server = Server::new(app);

    let first = get(&server, "/hello").await;
    let second = get(&server, "/missing").await;

    assert_eq!(first.headers["x-request-number"], "1");
    assert_eq!(first.json(), json!({ "message": "hi" }));
    assert_eq!(second.headers["x-request-number"], "2");
    assert_eq!(second.status, StatusCode::NOT_FOUND);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
