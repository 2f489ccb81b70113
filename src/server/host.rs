//! The admin site host
//!
//! [`Kibble`] holds everything views share for the lifetime of the process:
//! configuration, the view registry, the datastore handle and the
//! collaborators. It is built once by the
//! [`KibbleBuilder`](super::KibbleBuilder) and handed to every request
//! behind an `Arc`.
//!
//! # Example
//!
//! ```rust,ignore
//! let kibble = KibbleBuilder::new()
//!     .with_datastore(InMemoryDatastore::new())
//!     .register_views(standard_views(author, vec![]))?
//!     .build_host()?;
//!
//! let url = kibble.url_for("Author", "list", None, None);
//! ```

use crate::config::KibbleConfig;
use crate::core::auth::{AuthContext, Authenticator};
use crate::core::datastore::Datastore;
use crate::core::error::KibbleError;
use crate::core::events::EventBus;
use crate::core::key::Key;
use crate::core::labels::{LabelService, title_case};
use crate::core::model::ModelSchema;
use crate::forms::ModelConverter;
use crate::server::registry::ViewRegistry;
use crate::server::render::TemplateRenderer;
use crate::views::controller::{ActionButton, MenuGroup, SiteSummary};
use crate::views::label_for_schema;
use axum::response::{Html, IntoResponse, Response};
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;

/// Shared state of one admin site
pub struct Kibble {
    config: KibbleConfig,
    registry: ViewRegistry,
    store: Arc<dyn Datastore>,
    authenticator: Arc<dyn Authenticator>,
    converter: Arc<dyn ModelConverter>,
    renderer: Arc<dyn TemplateRenderer>,
    labels: LabelService,
    events: EventBus,
    schemas: IndexMap<String, Arc<ModelSchema>>,
}

/// The collaborators a host is assembled from
pub(crate) struct HostParts {
    pub config: KibbleConfig,
    pub registry: ViewRegistry,
    pub store: Arc<dyn Datastore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub converter: Arc<dyn ModelConverter>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub events: EventBus,
    pub schemas: IndexMap<String, Arc<ModelSchema>>,
}

impl Kibble {
    pub(crate) fn from_parts(parts: HostParts) -> Self {
        let labels = LabelService::new(parts.config.kind_labels.clone());
        Self {
            config: parts.config,
            registry: parts.registry,
            store: parts.store,
            authenticator: parts.authenticator,
            converter: parts.converter,
            renderer: parts.renderer,
            labels,
            events: parts.events,
            schemas: parts.schemas,
        }
    }

    pub fn config(&self) -> &KibbleConfig {
        &self.config
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn Datastore> {
        self.store.clone()
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn converter(&self) -> Arc<dyn ModelConverter> {
        self.converter.clone()
    }

    pub fn labels(&self) -> &LabelService {
        &self.labels
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Every known model by kind
    pub fn schemas(&self) -> &IndexMap<String, Arc<ModelSchema>> {
        &self.schemas
    }

    /// Display label of a model
    pub fn label_for_kind(&self, schema: &ModelSchema) -> String {
        label_for_schema(&self.labels, schema)
    }

    /// `path` under the admin prefix
    pub fn prefixed(&self, path: &str) -> String {
        format!("{}{}", self.config.prefix(), path)
    }

    pub fn index_url(&self) -> String {
        self.prefixed("/")
    }

    /// URL of a registered view, if it exists and accepts the keys
    pub fn url_for(&self, path: &str, action: &str, key: Option<&Key>, ancestor_key: Option<&Key>) -> Option<String> {
        let view = self.registry.get(path, action)?;
        let relative = view.build_path(key, ancestor_key, None)?;
        Some(self.prefixed(&relative))
    }

    /// Render the first existing template of the chain as HTML
    pub fn render(&self, templates: &[String], context: &tera::Context) -> Result<Response, KibbleError> {
        let body = self.renderer.render(templates, context)?;
        Ok(Html(body).into_response())
    }

    /// Menu of every visible top-level view `auth` may open
    pub async fn menu(&self, auth: &AuthContext) -> Vec<MenuGroup> {
        let mut menu = Vec::new();
        for (name, views) in self.registry.grouped(&self.config.kind_groups) {
            let checks = views
                .iter()
                .filter(|view| !view.requires_instance())
                .map(|view| async move {
                    let url = self.url_for(&view.path(), view.action(), None, None)?;
                    let permitted = self
                        .authenticator
                        .has_permission_for(auth, Some(view.kind()), view.action(), None)
                        .await;
                    if !permitted {
                        return None;
                    }
                    let kind_label = view.kind_label(&self.labels);
                    let label = match view.action() {
                        "list" => kind_label,
                        action => format!("{} {}", title_case(action), kind_label),
                    };
                    Some(ActionButton {
                        action: view.action().to_string(),
                        label,
                        url,
                        icon: view.icon().map(str::to_string),
                        class: view.class().to_string(),
                    })
                });
            let items: Vec<_> = join_all(checks).await.into_iter().flatten().collect();
            if !items.is_empty() {
                menu.push(MenuGroup { name, items });
            }
        }
        menu
    }

    /// What templates see of the site
    pub async fn site_summary(&self, auth: &AuthContext) -> SiteSummary {
        SiteSummary {
            label: self.config.label.clone(),
            index_url: self.index_url(),
            menu: self.menu(auth).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::NoAuthProvider;
    use crate::forms::KibbleModelConverter;
    use crate::server::render::TeraRenderer;
    use crate::storage::InMemoryDatastore;
    use crate::views::standard_views;

    fn host(config: KibbleConfig) -> Kibble {
        let author = Arc::new(ModelSchema::new("Author"));
        let book = Arc::new(ModelSchema::new("BlogPost"));
        let mut registry = ViewRegistry::new();
        for view in standard_views(author.clone(), vec![])
            .into_iter()
            .chain(standard_views(book, vec![author]))
        {
            registry.register(view).unwrap();
        }
        Kibble::from_parts(HostParts {
            renderer: Arc::new(TeraRenderer::new(config.template_dir.as_deref()).unwrap()),
            config,
            registry,
            store: Arc::new(InMemoryDatastore::new()),
            authenticator: Arc::new(NoAuthProvider),
            converter: Arc::new(KibbleModelConverter),
            events: EventBus::default(),
            schemas: IndexMap::new(),
        })
    }

    #[test]
    fn test_urls_carry_the_prefix() {
        let kibble = host(KibbleConfig::default());
        assert_eq!(kibble.index_url(), "/admin/");
        assert_eq!(kibble.url_for("Author", "list", None, None), Some("/admin/author/".to_string()));
        assert_eq!(
            kibble.url_for("Author/BlogPost", "edit", Some(&Key::new("Author", 1).child("BlogPost", 2)), None),
            Some("/admin/author-1/blogpost-2/".to_string())
        );
        assert_eq!(kibble.url_for("Author", "publish", None, None), None);
        assert_eq!(kibble.url_for("Author/BlogPost", "create", None, None), None);
    }

    #[test]
    fn test_labels_use_configuration() {
        let mut config = KibbleConfig::default();
        config.kind_labels.insert("Author".to_string(), "Writer".to_string());
        let kibble = host(config);
        assert_eq!(kibble.label_for_kind(&ModelSchema::new("Author")), "Writer");
        assert_eq!(kibble.label_for_kind(&ModelSchema::new("BlogPost")), "Blog Post");
    }

    #[tokio::test]
    async fn test_menu_lists_top_level_views() {
        let kibble = host(KibbleConfig::default());
        let menu = kibble.menu(&AuthContext::Anonymous).await;
        assert_eq!(menu.len(), 1);

        let labels: Vec<_> = menu[0].items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Author", "Create Author", "Blog Post"]);
    }
}
