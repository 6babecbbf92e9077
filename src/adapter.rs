//! Storage collaborator.
//!
//! The framework ships no database driver. Anything implementing
//! [`DbAdapter`] can be attached through a plugin as a [`Database`]
//! decoration and reached from handlers:
//!
//! ```rust,ignore
//! let db = req.extension::<Database>().ok_or_else(|| Error::msg("no database"))?;
//! let users = db.find("users", None).await?;
//! ```

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::handler::BoxFuture;

/// Document-store operations a backing database must provide.
///
/// Queries and documents are JSON values; their shape is up to the adapter.
pub trait DbAdapter: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Documents in `collection` matching `query`, or all of them.
    fn find<'a>(&'a self, collection: &'a str, query: Option<&'a Value>) -> BoxFuture<'a, Result<Vec<Value>, Error>>;

    /// Stores `doc` and returns it as stored.
    fn insert<'a>(&'a self, collection: &'a str, doc: Value) -> BoxFuture<'a, Result<Value, Error>>;

    /// Applies `update` to matching documents. Returns how many changed.
    fn update<'a>(&'a self, collection: &'a str, query: &'a Value, update: Value) -> BoxFuture<'a, Result<u64, Error>>;

    /// Removes matching documents. Returns how many were removed.
    fn delete<'a>(&'a self, collection: &'a str, query: &'a Value) -> BoxFuture<'a, Result<u64, Error>>;
}

/// Shared handle to a [`DbAdapter`], suitable for
/// [`App::decorate`](crate::App::decorate).
#[derive(Clone)]
pub struct Database(Arc<dyn DbAdapter>);

impl Database {
    pub fn new(adapter: impl DbAdapter) -> Self {
        Self(Arc::new(adapter))
    }
}

impl Deref for Database {
    type Target = dyn DbAdapter;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Database")
    }
}
