//! Plugins: named, dependency-aware units of registration.
//!
//! A plugin receives `&mut App` and can do anything the application can:
//! add routes, middleware and hooks, and [`decorate`](crate::App::decorate)
//! the application with typed values that handlers read back through
//! [`Request::extension`](crate::Request::extension).
//!
//! ```rust
//! use azura::{App, Error, Plugin, PluginOptions};
//!
//! #[derive(Clone)]
//! struct Greeting(String);
//!
//! struct GreetingPlugin;
//!
//! impl Plugin for GreetingPlugin {
//!     fn name(&self) -> &str { "greeting" }
//!
//!     fn register(&self, app: &mut App, options: &PluginOptions) -> Result<(), Error> {
//!         let text = options["text"].as_str().unwrap_or("hello").to_owned();
//!         app.decorate(Greeting(text))?;
//!         Ok(())
//!     }
//! }
//!
//! let mut app = App::new();
//! app.register_plugin(GreetingPlugin, serde_json::json!({ "text": "hi" })).unwrap();
//! assert_eq!(app.extension::<Greeting>().unwrap().0, "hi");
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::app::App;
use crate::error::Error;

/// Free-form plugin options. Dependencies pulled in automatically get `Null`.
pub type PluginOptions = serde_json::Value;

pub trait Plugin: Send + Sync + 'static {
    /// Unique name. A second registration under the same name is a no-op.
    fn name(&self) -> &str;

    /// Plugins that must be registered before this one.
    fn dependencies(&self) -> Vec<Arc<dyn Plugin>> {
        Vec::new()
    }

    fn register(&self, app: &mut App, options: &PluginOptions) -> Result<(), Error>;
}

/// Tracks which plugins are loaded and which are mid-registration.
#[derive(Debug, Default)]
pub(crate) struct PluginLoader {
    loaded: HashSet<String>,
    in_progress: Vec<String>,
}

impl PluginLoader {
    pub(crate) fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    /// Marks `name` as being registered. Fails if it already is, which means
    /// a dependency cycle leads back to it.
    pub(crate) fn begin(&mut self, name: &str) -> Result<(), Error> {
        if self.in_progress.iter().any(|n| n == name) {
            let mut path = self.in_progress.join(" -> ");
            path.push_str(" -> ");
            path.push_str(name);
            return Err(Error::PluginCycle(path));
        }
        self.in_progress.push(name.to_owned());
        Ok(())
    }

    /// Ends the registration of `name`, marking it loaded on success.
    pub(crate) fn end(&mut self, name: &str, succeeded: bool) {
        if let Some(pos) = self.in_progress.iter().rposition(|n| n == name) {
            self.in_progress.remove(pos);
        }
        if succeeded {
            self.loaded.insert(name.to_owned());
        }
    }

    pub(crate) fn loaded(&self) -> usize {
        self.loaded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_detects_reentry() {
        let mut loader = PluginLoader::default();
        loader.begin("auth").unwrap();
        loader.begin("db").unwrap();
        match loader.begin("auth") {
            Err(Error::PluginCycle(path)) => assert_eq!(path, "auth -> db -> auth"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn failed_registration_is_not_loaded() {
        let mut loader = PluginLoader::default();
        loader.begin("db").unwrap();
        loader.end("db", false);
        assert!(!loader.is_loaded("db"));
        loader.begin("db").unwrap();
        loader.end("db", true);
        assert!(loader.is_loaded("db"));
        assert_eq!(loader.loaded(), 1);
    }
}
