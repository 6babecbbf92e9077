//! Segment trie request router.
//!
//! Paths split on `/` into segments; empty segments are dropped, so
//! `/users/`, `users` and `//users` are the same route. A segment starting
//! with `:` captures one path segment into a named parameter.
//!
//! Each node has literal children keyed by exact segment and at most one
//! parameter child. Lookup walks one node per segment, literal first, with no
//! backtracking: O(segments) for both insert and lookup.
//!
//! The single parameter slot is shared by every route that has a parameter at
//! that depth. Names are not stored in the slot but at each route's terminal
//! entry, so `/users/:id` and `/users/:user_id/posts` each see their own
//! parameter names.

use std::collections::HashMap;

use http::Method;

use crate::error::Error;
use crate::handler::BoxedHandler;

/// Handlers and parameter names registered for one (method, path).
#[derive(Clone)]
struct Route {
    handlers: Vec<BoxedHandler>,
    param_names: Vec<String>,
}

#[derive(Clone, Default)]
struct RouteNode {
    literals: HashMap<String, RouteNode>,
    param: Option<Box<RouteNode>>,
    routes: HashMap<Method, Route>,
}

/// A successful lookup.
pub(crate) struct RouteMatch<'r> {
    pub(crate) handlers: &'r [BoxedHandler],
    pub(crate) params: HashMap<String, String>,
}

/// The application router.
///
/// Built during registration, then frozen inside the server and read
/// concurrently without locks.
#[derive(Clone, Default)]
pub(crate) struct Router {
    root: RouteNode,
    len: usize,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `handlers` for `method` + `path`. Registering the same pair
    /// again replaces the previous handlers.
    pub(crate) fn add(&mut self, method: Method, path: &str, handlers: Vec<BoxedHandler>) {
        let mut node = &mut self.root;
        let mut param_names = Vec::new();
        for segment in segments(path) {
            node = match segment.strip_prefix(':') {
                Some(name) => {
                    param_names.push(name.to_owned());
                    node.param.get_or_insert_with(Box::default).as_mut()
                }
                None => node.literals.entry(segment.to_owned()).or_default(),
            };
        }

        let replaced = node.routes.insert(method.clone(), Route { handlers, param_names });
        if replaced.is_some() {
            tracing::debug!(%method, path, "route re-registered, previous handlers replaced");
        } else {
            self.len += 1;
        }
    }

    /// Resolves `method` + `path` to its handlers and captured parameters.
    pub(crate) fn find(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, Error> {
        let mut node = &self.root;
        let mut captured = Vec::new();
        for segment in segments(path) {
            node = match (node.literals.get(segment), node.param.as_deref()) {
                (Some(literal), _) => literal,
                (None, Some(param)) => {
                    captured.push(segment);
                    param
                }
                (None, None) => return Err(Error::RouteNotFound),
            };
        }

        let route = node.routes.get(method).ok_or(Error::RouteNotFound)?;
        let params = route
            .param_names
            .iter()
            .zip(captured)
            .map(|(name, raw)| {
                let value = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.to_owned());
                (name.clone(), value)
            })
            .collect();

        Ok(RouteMatch { handlers: &route.handlers, params })
    }

    /// Number of distinct (method, path) registrations.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
