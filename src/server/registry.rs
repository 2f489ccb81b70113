//! View registry: every registered view by model path and action

use crate::config::KindGroup;
use crate::core::error::{KibbleError, RegistryError, RequestError};
use crate::core::request::ViewArgs;
use crate::views::ViewDefinition;
use axum::http::Method;
use indexmap::IndexMap;
use std::sync::Arc;

/// Registry of all views in the application
///
/// Append-only: views are added while the site is built and never removed.
/// Lookups preserve registration order, which is also the order URL
/// patterns are tried in.
#[derive(Default)]
pub struct ViewRegistry {
    by_path: IndexMap<String, IndexMap<String, Arc<ViewDefinition>>>,
    ordered: Vec<Arc<ViewDefinition>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a view
    ///
    /// Registering a second view for the same path and action fails.
    pub fn register(&mut self, mut view: ViewDefinition) -> Result<Arc<ViewDefinition>, KibbleError> {
        let path = view.path();
        let action = view.action().to_string();
        if self.get(&path, &action).is_some() {
            return Err(RegistryError::DuplicateView { path, action }.into());
        }
        view.compile()?;

        let view = Arc::new(view);
        tracing::debug!(path = %path, action = %action, "registered view");
        self.by_path
            .entry(path)
            .or_default()
            .insert(action, view.clone());
        self.ordered.push(view.clone());
        Ok(view)
    }

    pub fn get(&self, path: &str, action: &str) -> Option<&Arc<ViewDefinition>> {
        self.by_path.get(path)?.get(action)
    }

    /// Registered actions of one path
    pub fn actions_for(&self, path: &str) -> Vec<&str> {
        self.by_path
            .get(path)
            .map(|actions| actions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All registered paths
    pub fn paths(&self) -> Vec<&str> {
        self.by_path.keys().map(String::as_str).collect()
    }

    pub fn views(&self) -> &[Arc<ViewDefinition>] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Every `(kind, action)` a permission can be granted for
    ///
    /// The index page comes first as `(None, "index")`.
    pub fn all_permissions(&self) -> Vec<(Option<String>, String)> {
        let mut permissions = vec![(None, "index".to_string())];
        for view in &self.ordered {
            let permission = (Some(view.kind().to_string()), view.action().to_string());
            if !permissions.contains(&permission) {
                permissions.push(permission);
            }
        }
        permissions
    }

    /// Visible views grouped for the menu
    ///
    /// Configured groups come first, in configuration order. Views of paths
    /// no group names end up in a trailing unnamed group. Empty groups are
    /// left out.
    pub fn grouped(&self, groups: &[KindGroup]) -> Vec<(Option<String>, Vec<Arc<ViewDefinition>>)> {
        let visible = |path: &str| -> Vec<Arc<ViewDefinition>> {
            self.by_path
                .get(path)
                .map(|actions| actions.values().filter(|v| !v.is_hidden()).cloned().collect())
                .unwrap_or_default()
        };

        let mut result = Vec::new();
        for group in groups {
            let views: Vec<_> = group.paths.iter().flat_map(|p| visible(p)).collect();
            if !views.is_empty() {
                result.push((Some(group.name.clone()), views));
            }
        }

        let rest: Vec<_> = self
            .by_path
            .keys()
            .filter(|path| !groups.iter().any(|g| g.paths.contains(path)))
            .flat_map(|path| visible(path))
            .collect();
        if !rest.is_empty() {
            result.push((None, rest));
        }
        result
    }

    /// The view answering `path`, relative to the admin prefix
    ///
    /// The first view whose pattern matches wins. A path that only matches
    /// views not accepting `method` is rejected as such rather than as
    /// unknown.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<(Arc<ViewDefinition>, ViewArgs), RequestError> {
        let mut method_mismatch = false;
        for view in &self.ordered {
            let Some(args) = view.match_path(path) else {
                continue;
            };
            if view.allows(method) {
                return Ok((view.clone(), args));
            }
            method_mismatch = true;
        }
        if method_mismatch {
            return Err(RequestError::MethodNotAllowed {
                method: method.to_string(),
            });
        }
        Err(RequestError::NotFound {
            path: path.to_string(),
        })
    }
}
