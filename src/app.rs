//! The application: everything registered before serving starts.
//!
//! Routes, global middleware, hooks, plugins and decorations all go through
//! [`App`]. Calling [`App::listen`] (or converting into a
//! [`Server`](crate::Server)) freezes the application; after that nothing can
//! be added.

use std::sync::Arc;

use http::{Extensions, Method};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, IntoHandlers};
use crate::hooks::{self, Hook, Hooks, Phase};
use crate::plugin::{Plugin, PluginLoader, PluginOptions};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::server::Server;
use crate::supervisor::{self, Supervisor};

/// Registration state taken before a plugin registers, restored if it fails.
struct Checkpoint {
    router: Router,
    middleware: usize,
    hooks: [usize; 6],
    decorations: Extensions,
}

/// A web application under construction.
///
/// ```rust
/// use azura::{App, handler};
/// use serde_json::json;
///
/// let mut app = App::new();
/// app.get("/hello", handler(|_req, res, _next| Box::pin(async move {
///     res.json(&json!({ "message": "hi" }))
/// })));
/// ```
pub struct App {
    pub(crate) router: Router,
    pub(crate) middleware: Vec<BoxedHandler>,
    pub(crate) hooks: Hooks,
    pub(crate) decorations: Extensions,
    pub(crate) config: Config,
    plugins: PluginLoader,
}

impl App {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            router: Router::new(),
            middleware: Vec::new(),
            hooks: Hooks::default(),
            decorations: Extensions::new(),
            config,
            plugins: PluginLoader::default(),
        }
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn config_mut(&mut self) -> &mut Config { &mut self.config }

    // ── Routes ────────────────────────────────────────────────────────────────

    /// Registers handlers for a method given by name (case-insensitive).
    pub fn add_route(&mut self, method: &str, path: &str, handlers: impl IntoHandlers) -> Result<&mut Self, Error> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidMethod(method.to_owned()))?;
        Ok(self.route(method, path, handlers))
    }

    /// Registers handlers for `method` + `path`. The handlers run in order,
    /// after all global middleware.
    pub fn route(&mut self, method: Method, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        debug!(%method, path, "route registered");
        self.router.add(method, path, handlers.into_handlers());
        self
    }

    pub fn get(&mut self, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        self.route(Method::GET, path, handlers)
    }

    pub fn post(&mut self, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        self.route(Method::POST, path, handlers)
    }

    pub fn put(&mut self, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        self.route(Method::PUT, path, handlers)
    }

    pub fn delete(&mut self, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        self.route(Method::DELETE, path, handlers)
    }

    pub fn patch(&mut self, path: &str, handlers: impl IntoHandlers) -> &mut Self {
        self.route(Method::PATCH, path, handlers)
    }

    // ── Middleware & hooks ────────────────────────────────────────────────────

    /// Appends global middleware. It runs for every routed request, before
    /// the route's own handlers.
    pub fn use_middleware(&mut self, middleware: BoxedHandler) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Appends a lifecycle hook to `phase`.
    ///
    /// ```rust
    /// use azura::{App, Phase};
    ///
    /// let mut app = App::new();
    /// app.on_hook(Phase::OnRequest, |req, res| Box::pin(async move {
    ///     res.set("x-served-by", "azura");
    ///     tracing::debug!(path = req.path(), "incoming");
    ///     Ok(())
    /// }));
    /// ```
    pub fn on_hook<F>(&mut self, phase: Phase, hook: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<(), Error>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.add(phase, hooks::hook(hook));
        self
    }

    /// Appends a [`Hook`] implementation to `phase`.
    pub fn add_hook(&mut self, phase: Phase, hook: impl Hook) -> &mut Self {
        self.hooks.add(phase, Arc::new(hook));
        self
    }

    // ── Plugins & decorations ─────────────────────────────────────────────────

    /// Registers `plugin` and, first, any of its dependencies not yet loaded.
    ///
    /// Returns `Ok(false)` when a plugin of that name is already loaded.
    /// Only `plugin` receives `options`; dependencies get `Null`.
    pub fn register_plugin(&mut self, plugin: impl Plugin, options: PluginOptions) -> Result<bool, Error> {
        self.load_plugin(&plugin, &options)
    }

    fn load_plugin(&mut self, plugin: &dyn Plugin, options: &PluginOptions) -> Result<bool, Error> {
        let name = plugin.name().to_owned();
        if self.plugins.is_loaded(&name) {
            debug!(plugin = %name, "plugin already registered, skipping");
            return Ok(false);
        }

        self.plugins.begin(&name)?;
        let outcome = self.register_with_dependencies(plugin, options);
        self.plugins.end(&name, outcome.is_ok());
        outcome?;

        info!(plugin = %name, "plugin registered");
        Ok(true)
    }

    fn register_with_dependencies(&mut self, plugin: &dyn Plugin, options: &PluginOptions) -> Result<(), Error> {
        for dependency in plugin.dependencies() {
            if !self.plugins.is_loaded(dependency.name()) {
                self.load_plugin(dependency.as_ref(), &PluginOptions::Null)?;
            }
        }
        let checkpoint = self.checkpoint();
        let outcome = plugin.register(self, options);
        if outcome.is_err() {
            debug!(plugin = plugin.name(), "plugin registration failed, rolling back its additions");
            self.restore(checkpoint);
        }
        outcome
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            router: self.router.clone(),
            middleware: self.middleware.len(),
            hooks: self.hooks.lens(),
            decorations: self.decorations.clone(),
        }
    }

    /// Drops routes, middleware, hooks and decorations added since
    /// `checkpoint`. Config edits are kept.
    fn restore(&mut self, checkpoint: Checkpoint) {
        self.router = checkpoint.router;
        self.middleware.truncate(checkpoint.middleware);
        self.hooks.truncate(checkpoint.hooks);
        self.decorations = checkpoint.decorations;
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.is_loaded(name)
    }

    /// Attaches a typed value to the application. Handlers read it with
    /// [`Request::extension`]; a second value of the same type is rejected.
    pub fn decorate<T>(&mut self, value: T) -> Result<&mut Self, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.decorations.get::<T>().is_some() {
            return Err(Error::AlreadyDecorated(std::any::type_name::<T>()));
        }
        self.decorations.insert(value);
        Ok(self)
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.decorations.get::<T>()
    }

    // ── Serving ───────────────────────────────────────────────────────────────

    /// Binds `host:port` from the config and serves until SIGTERM / Ctrl-C.
    ///
    /// With `cluster` enabled the calling process becomes a supervisor that
    /// runs one worker process per CPU and never binds the port itself;
    /// workers share the port through `SO_REUSEPORT`.
    pub async fn listen(self, port: u16) -> Result<(), Error> {
        let addr = format!("{}:{port}", self.config.host);
        let worker = supervisor::worker_id();

        if self.config.cluster && worker.is_none() {
            return Supervisor::from_config(&self.config)?.run().await;
        }

        let listener = if worker.is_some() {
            supervisor::bind_shared(&addr)?
        } else {
            tokio::net::TcpListener::bind(&addr).await?
        };
        Server::from(self).serve(listener).await
    }

    pub(crate) fn plugin_count(&self) -> usize {
        self.plugins.loaded()
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

impl From<App> for Server {
    fn from(app: App) -> Self {
        Server::new(app)
    }
}

/// Shared pieces handed to the server when the application is frozen.
pub(crate) struct Frozen {
    pub(crate) router: Router,
    pub(crate) middleware: Vec<BoxedHandler>,
    pub(crate) hooks: Hooks,
    pub(crate) decorations: Arc<Extensions>,
    pub(crate) config: Config,
}

impl App {
    pub(crate) fn freeze(self) -> Frozen {
        info!(
            routes = self.router.len(),
            middleware = self.middleware.len(),
            hooks = Phase::ALL.into_iter().map(|phase| self.hooks.count(phase)).sum::<usize>(),
            plugins = self.plugin_count(),
            "application frozen"
        );
        Frozen {
            router: self.router,
            middleware: self.middleware,
            hooks: self.hooks,
            decorations: Arc::new(self.decorations),
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recording {
        name: &'static str,
        deps: Vec<Arc<dyn Plugin>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Recording {
        fn name(&self) -> &str { self.name }

        fn dependencies(&self) -> Vec<Arc<dyn Plugin>> { self.deps.clone() }

        fn register(&self, _app: &mut App, options: &PluginOptions) -> Result<(), Error> {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, options));
            Ok(())
        }
    }

    #[test]
    fn add_route_normalizes_method_names() {
        let mut app = App::new();
        let noop = crate::handler(|_req, _res, _next| Box::pin(async { Ok::<(), Error>(()) }));
        app.add_route("get", "/x", noop.clone()).unwrap();
        assert!(app.router.find(&Method::GET, "/x").is_ok());
        assert!(matches!(app.add_route("GE T", "/x", noop), Err(Error::InvalidMethod(_))));
    }

    #[test]
    fn dependencies_register_first_with_null_options() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a: Arc<dyn Plugin> = Arc::new(Recording { name: "a", deps: vec![], log: log.clone() });
        let b = Recording { name: "b", deps: vec![a], log: log.clone() };

        let mut app = App::new();
        assert!(app.register_plugin(b, serde_json::json!({ "x": 1 })).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["a:null".to_owned(), r#"b:{"x":1}"#.to_owned()]);
        assert!(app.has_plugin("a"));
    }

    #[test]
    fn failed_plugin_leaves_no_registrations_behind() {
        #[derive(Clone)]
        struct Pool;

        struct HalfDone(Mutex<u32>);

        impl Plugin for HalfDone {
            fn name(&self) -> &str { "half-done" }

            fn register(&self, app: &mut App, _options: &PluginOptions) -> Result<(), Error> {
                let noop = crate::handler(|_req, _res, _next| Box::pin(async { Ok::<(), Error>(()) }));
                app.decorate(Pool)?;
                app.use_middleware(noop.clone());
                app.get("/pool", noop);
                app.on_hook(Phase::OnRequest, |_req, _res| Box::pin(async { Ok::<(), Error>(()) }));

                let mut attempts = self.0.lock().unwrap();
                *attempts += 1;
                if *attempts == 1 {
                    return Err(Error::msg("pool unavailable"));
                }
                Ok(())
            }
        }

        struct Shared(Arc<HalfDone>);

        impl Plugin for Shared {
            fn name(&self) -> &str { self.0.name() }

            fn register(&self, app: &mut App, options: &PluginOptions) -> Result<(), Error> {
                self.0.register(app, options)
            }
        }

        let mut app = App::new();
        app.get("/kept", crate::handler(|_req, _res, _next| Box::pin(async { Ok::<(), Error>(()) })));
        let plugin = Arc::new(HalfDone(Mutex::new(0)));

        assert!(app.register_plugin(Shared(Arc::clone(&plugin)), PluginOptions::Null).is_err());
        assert!(!app.has_plugin("half-done"));
        assert!(app.extension::<Pool>().is_none());
        assert!(app.middleware.is_empty());
        assert_eq!(app.hooks.count(Phase::OnRequest), 0);
        assert!(app.router.find(&Method::GET, "/pool").is_err());
        assert!(app.router.find(&Method::GET, "/kept").is_ok());
        assert_eq!(app.router.len(), 1);

        assert!(app.register_plugin(Shared(plugin), PluginOptions::Null).unwrap());
        assert!(app.extension::<Pool>().is_some());
        assert_eq!(app.middleware.len(), 1);
        assert_eq!(app.hooks.count(Phase::OnRequest), 1);
        assert_eq!(app.router.len(), 2);
    }

    #[test]
    fn decorate_rejects_duplicates() {
        #[derive(Clone)]
        struct Version(u32);

        let mut app = App::new();
        app.decorate(Version(1)).unwrap();
        assert!(matches!(app.decorate(Version(2)), Err(Error::AlreadyDecorated(_))));
        assert_eq!(app.extension::<Version>().map(|v| v.0), Some(1));
    }
}
