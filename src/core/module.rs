//! Module system for kibble
//!
//! Applications group the admin views of related models into modules, and
//! [`KibbleBuilder::autodiscover`](crate::server::KibbleBuilder::autodiscover)
//! registers every module's views in one pass at startup.

use crate::core::model::ModelSchema;
use crate::views::ViewDefinition;
use anyhow::Result;
use indexmap::IndexMap;
use std::sync::Arc;

/// A set of admin views contributed by one part of an application
pub trait ViewModule: Send + Sync {
    /// Unique name of the module
    fn name(&self) -> &str;

    /// Kinds this module contributes views for
    fn kinds(&self) -> Vec<&str>;

    /// Build the module's view definitions
    ///
    /// `models` holds every schema known to the builder by kind, so views
    /// can name ancestors declared by other modules.
    fn views(&self, models: &IndexMap<String, Arc<ModelSchema>>) -> Result<Vec<ViewDefinition>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Library;

    impl ViewModule for Library {
        fn name(&self) -> &str {
            "library"
        }

        fn kinds(&self) -> Vec<&str> {
            vec!["Author"]
        }

        fn views(&self, models: &IndexMap<String, Arc<ModelSchema>>) -> Result<Vec<ViewDefinition>> {
            let author = models
                .get("Author")
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Author is not a known model"))?;
            Ok(vec![ViewDefinition::list(author)])
        }
    }

    #[test]
    fn test_module_builds_views_from_models() {
        let mut models = IndexMap::new();
        models.insert("Author".to_string(), Arc::new(ModelSchema::new("Author")));

        let views = Library.views(&models).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].path(), "Author");
        assert_eq!(Library.name(), "library");
    }

    #[test]
    fn test_module_reports_missing_models() {
        assert!(Library.views(&IndexMap::new()).is_err());
    }
}
