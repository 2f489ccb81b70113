//! KibbleBuilder for fluent assembly of an admin site

use super::handlers;
use super::host::{HostParts, Kibble};
use super::registry::ViewRegistry;
use super::render::{TemplateRenderer, TeraRenderer};
use crate::config::KibbleConfig;
use crate::core::auth::{Authenticator, PolicyAuthenticator};
use crate::core::datastore::Datastore;
use crate::core::events::EventBus;
use crate::core::model::ModelSchema;
use crate::core::module::ViewModule;
use crate::forms::{KibbleModelConverter, ModelConverter};
use crate::views::ViewDefinition;
use anyhow::Result;
use axum::Router;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for an admin site
///
/// # Example
///
/// ```ignore
/// let app = KibbleBuilder::new()
///     .with_config_file("kibble.yaml")?
///     .with_datastore(InMemoryDatastore::new())
///     .register_views(standard_views(author, vec![]))
///     .build()?;
/// ```
pub struct KibbleBuilder {
    config: KibbleConfig,
    store: Option<Arc<dyn Datastore>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    converter: Arc<dyn ModelConverter>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    event_bus: EventBus,
    models: IndexMap<String, Arc<ModelSchema>>,
    views: Vec<ViewDefinition>,
    custom_routes: Vec<Router>,
}

impl KibbleBuilder {
    pub fn new() -> Self {
        Self {
            config: KibbleConfig::default(),
            store: None,
            authenticator: None,
            converter: Arc::new(KibbleModelConverter),
            renderer: None,
            event_bus: EventBus::default(),
            models: IndexMap::new(),
            views: Vec::new(),
            custom_routes: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: KibbleConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a YAML file
    pub fn with_config_file(self, path: &str) -> Result<Self> {
        let config = KibbleConfig::from_yaml_file(path)?;
        Ok(self.with_config(config))
    }

    /// Set the datastore (required)
    pub fn with_datastore(mut self, store: impl Datastore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the authenticator; defaults to policies from the configuration
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_model_converter(mut self, converter: impl ModelConverter + 'static) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    /// Set the renderer; defaults to Tera over the bundled templates
    pub fn with_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Replace the action event bus with one of the given capacity
    pub fn with_event_bus(mut self, capacity: usize) -> Self {
        self.event_bus = EventBus::new(capacity);
        self
    }

    /// Make a model known without registering views for it
    ///
    /// Key-select fields and key filters label the entities they offer
    /// with the referenced model's schema.
    pub fn with_model(mut self, model: Arc<ModelSchema>) -> Self {
        self.models.insert(model.kind().to_string(), model);
        self
    }

    /// Add routes served next to the admin, e.g. a login page
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Register one view
    ///
    /// Duplicates are reported by [`build_host`](Self::build_host).
    pub fn register_view(mut self, view: ViewDefinition) -> Self {
        self.remember_models(&view);
        self.views.push(view);
        self
    }

    pub fn register_views(self, views: impl IntoIterator<Item = ViewDefinition>) -> Self {
        views.into_iter().fold(self, Self::register_view)
    }

    /// Register every view of a module
    pub fn register_module(self, module: impl ViewModule + 'static) -> Result<Self> {
        let views = module.views(&self.models)?;
        tracing::debug!(module = module.name(), count = views.len(), "registering module");
        Ok(self.register_views(views))
    }

    /// Register the views of many modules in one pass
    ///
    /// With `only`, modules contribute just the views of the listed kinds,
    /// and modules without any of them are skipped.
    pub fn autodiscover(mut self, modules: Vec<Box<dyn ViewModule>>, only: Option<&[&str]>) -> Result<Self> {
        for module in modules {
            let wanted = |kind: &str| only.map_or(true, |kinds| kinds.contains(&kind));
            if !module.kinds().into_iter().any(wanted) {
                tracing::debug!(module = module.name(), "skipping module");
                continue;
            }
            let views = module.views(&self.models)?;
            tracing::debug!(module = module.name(), count = views.len(), "discovered module");
            self = self.register_views(views.into_iter().filter(|v| wanted(v.kind())));
        }
        Ok(self)
    }

    fn remember_models(&mut self, view: &ViewDefinition) {
        for model in view.ancestor_schemas().iter().chain(std::iter::once(view.model())) {
            self.models
                .entry(model.kind().to_string())
                .or_insert_with(|| model.clone());
        }
    }

    /// Build the shared host
    pub fn build_host(self) -> Result<Kibble> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Datastore is required. Call .with_datastore()"))?;

        let mut registry = ViewRegistry::new();
        for view in self.views {
            registry.register(view)?;
        }

        let authenticator = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(PolicyAuthenticator::from_config(&self.config)),
        };
        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(TeraRenderer::new(self.config.template_dir.as_deref())?),
        };

        tracing::info!(
            views = registry.len(),
            prefix = %self.config.prefix(),
            "admin site assembled"
        );
        Ok(Kibble::from_parts(HostParts {
            config: self.config,
            registry,
            store,
            authenticator,
            converter: self.converter,
            renderer,
            events: self.event_bus,
            schemas: self.models,
        }))
    }

    /// Build the router serving the admin and any custom routes
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        Ok(custom_routes
            .into_iter()
            .fold(handlers::router(host), |app, routes| app.merge(routes)))
    }

    /// Serve the admin with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C).
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for KibbleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::NoAuthProvider;
    use crate::storage::InMemoryDatastore;
    use crate::views::standard_views;

    fn author() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("Author"))
    }

    fn book() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("Book"))
    }

    struct Library;

    impl ViewModule for Library {
        fn name(&self) -> &str {
            "library"
        }

        fn kinds(&self) -> Vec<&str> {
            vec!["Author", "Book"]
        }

        fn views(&self, _models: &IndexMap<String, Arc<ModelSchema>>) -> Result<Vec<ViewDefinition>> {
            let mut views = standard_views(author(), vec![]);
            views.extend(standard_views(book(), vec![author()]));
            Ok(views)
        }
    }

    struct Broken;

    impl ViewModule for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn kinds(&self) -> Vec<&str> {
            vec!["Author"]
        }

        fn views(&self, _models: &IndexMap<String, Arc<ModelSchema>>) -> Result<Vec<ViewDefinition>> {
            anyhow::bail!("cannot build views")
        }
    }

    #[test]
    fn test_build_host_without_datastore_fails() {
        let err = KibbleBuilder::new().build_host().err().unwrap();
        assert!(err.to_string().contains("Datastore is required"));
    }

    #[test]
    fn test_register_views_and_models() {
        let host = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .register_views(standard_views(book(), vec![author()]))
            .build_host()
            .unwrap();
        assert_eq!(host.registry().len(), 4);
        assert_eq!(host.schemas().keys().collect::<Vec<_>>(), vec!["Author", "Book"]);
    }

    #[test]
    fn test_duplicate_views_fail_the_build() {
        let result = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .register_view(ViewDefinition::list(author()))
            .register_view(ViewDefinition::list(author()))
            .build_host();
        assert!(result.is_err());
    }

    #[test]
    fn test_register_module() {
        let host = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .register_module(Library)
            .unwrap()
            .build_host()
            .unwrap();
        assert_eq!(host.registry().paths(), vec!["Author", "Author/Book"]);

        assert!(KibbleBuilder::new().register_module(Broken).is_err());
    }

    #[test]
    fn test_autodiscover_restricted_to_kinds() {
        let modules: Vec<Box<dyn ViewModule>> = vec![Box::new(Library)];
        let host = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .autodiscover(modules, Some(&["Author"]))
            .unwrap()
            .build_host()
            .unwrap();
        assert_eq!(host.registry().paths(), vec!["Author"]);

        let modules: Vec<Box<dyn ViewModule>> = vec![Box::new(Broken)];
        let builder = KibbleBuilder::new().autodiscover(modules, Some(&["Book"]));
        assert!(builder.is_ok());
    }

    #[test]
    fn test_config_reaches_the_host() {
        let mut config = KibbleConfig::default();
        config.url_prefix = "/manage".to_string();
        let host = KibbleBuilder::new()
            .with_config(config)
            .with_datastore(InMemoryDatastore::new())
            .with_authenticator(NoAuthProvider)
            .with_event_bus(8)
            .build_host()
            .unwrap();
        assert_eq!(host.index_url(), "/manage/");
        assert_eq!(host.events().receiver_count(), 0);
    }

    #[test]
    fn test_build_produces_router() {
        let result = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .register_views(standard_views(author(), vec![]))
            .with_custom_routes(Router::new())
            .build();
        assert!(result.is_ok());
    }
}
