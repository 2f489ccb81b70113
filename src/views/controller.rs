//! The per-request view controller

use crate::core::datastore::load_lineage;
use crate::core::error::{KibbleError, StorageError};
use crate::core::key::Key;
use crate::core::model::{Entity, ModelSchema};
use crate::core::labels::title_case;
use crate::core::request::{RequestArgs, RequestState, with_query};
use crate::server::host::Kibble;
use crate::views::{ViewBehavior, ViewDefinition, edit, list, operation};
use axum::response::Response;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

/// A link to another view, as rendered in button bars
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionButton {
    pub action: String,
    pub label: String,
    pub url: String,
    pub icon: Option<String>,
    pub class: String,
}

/// An entity on the breadcrumb trail
#[derive(Debug, Clone, Serialize)]
pub struct Crumb {
    pub key: Key,
    pub label: String,
    pub url: Option<String>,
}

/// What templates see of an instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub key: Option<Key>,
    pub label: String,
}

impl InstanceSummary {
    pub fn new(schema: &ModelSchema, entity: &Entity) -> Self {
        Self {
            key: entity.key(),
            label: schema.label_for(entity),
        }
    }
}

/// What templates see of the admin site
#[derive(Debug, Clone, Serialize)]
pub struct SiteSummary {
    pub label: String,
    pub index_url: String,
    pub menu: Vec<MenuGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuGroup {
    pub name: Option<String>,
    pub items: Vec<ActionButton>,
}

/// One rendering of one view definition
///
/// Holds the shared host, the matched definition and the request it serves.
/// Everything a behaviour needs beyond its own options goes through here.
#[derive(Clone)]
pub struct KibbleView {
    host: Arc<Kibble>,
    definition: Arc<ViewDefinition>,
    request: Arc<RequestState>,
}

impl KibbleView {
    pub fn new(host: Arc<Kibble>, definition: Arc<ViewDefinition>, request: RequestState) -> Self {
        Self {
            host,
            definition,
            request: Arc::new(request),
        }
    }

    pub fn host(&self) -> &Arc<Kibble> {
        &self.host
    }

    pub fn definition(&self) -> &Arc<ViewDefinition> {
        &self.definition
    }

    pub fn request(&self) -> &Arc<RequestState> {
        &self.request
    }

    pub fn templates(&self) -> Vec<String> {
        self.definition.templates()
    }

    /// Run the view's behaviour
    pub async fn dispatch(&self) -> Result<Response, KibbleError> {
        let definition = self.definition.clone();
        match definition.behavior() {
            ViewBehavior::List(options) => list::dispatch(self, options).await,
            ViewBehavior::Create(options) => edit::dispatch_create(self, options).await,
            ViewBehavior::Edit(options) => edit::dispatch_edit(self, options).await,
            ViewBehavior::Operation(options) => operation::dispatch(self, options).await,
        }
    }

    /// Whether the current user may run this view, optionally on one instance
    pub async fn has_permission_for(&self, key: Option<&Key>) -> bool {
        self.view_permitted(&self.definition, key).await
    }

    async fn view_permitted(&self, view: &ViewDefinition, key: Option<&Key>) -> bool {
        self.host
            .authenticator()
            .has_permission_for(&self.request.auth, Some(view.kind()), view.action(), key)
            .await
    }

    /// Linked views that are registered; unknown references are dropped
    pub fn linked_actions(&self) -> Vec<Arc<ViewDefinition>> {
        let own_path = self.definition.path();
        self.definition
            .linked_action_refs()
            .iter()
            .filter_map(|reference| {
                let (path, action) = reference
                    .split_once(':')
                    .unwrap_or((own_path.as_str(), reference.as_str()));
                let view = self.host.registry().get(path, action).cloned();
                if view.is_none() {
                    tracing::debug!(reference = %reference, "dropping unknown linked action");
                }
                view
            })
            .collect()
    }

    /// Linked views that act under an ancestor
    pub fn ancestor_actions(&self) -> Vec<Arc<ViewDefinition>> {
        self.linked_actions()
            .into_iter()
            .filter(|v| v.requires_ancestor())
            .collect()
    }

    /// Linked views that act on one instance
    pub fn instance_actions(&self) -> Vec<Arc<ViewDefinition>> {
        self.linked_actions()
            .into_iter()
            .filter(|v| v.requires_instance())
            .collect()
    }

    /// Arguments every generated link carries
    ///
    /// Popups stay popups. Embed mode is never carried over; callers that
    /// want it pass `_embed` in `extra`.
    fn link_args(&self, extra: &RequestArgs) -> RequestArgs {
        let mut args = extra.clone();
        if self.request.is_popup() && !args.contains("_popup") {
            args.insert("_popup", "1");
        }
        args
    }

    /// URL of this view
    pub fn url_for(&self, key: Option<&Key>, ancestor_key: Option<&Key>, extra: &RequestArgs) -> Option<String> {
        self.url_for_view(&self.definition, key, ancestor_key, extra)
    }

    /// URL of any view, carrying this request's popup state
    pub fn url_for_view(
        &self,
        view: &ViewDefinition,
        key: Option<&Key>,
        ancestor_key: Option<&Key>,
        extra: &RequestArgs,
    ) -> Option<String> {
        self.url_for_page(view, key, ancestor_key, None, extra)
    }

    pub fn url_for_page(
        &self,
        view: &ViewDefinition,
        key: Option<&Key>,
        ancestor_key: Option<&Key>,
        page: Option<usize>,
        extra: &RequestArgs,
    ) -> Option<String> {
        let path = view.build_path(key, ancestor_key, page)?;
        Some(with_query(&self.host.prefixed(&path), &self.link_args(extra)))
    }

    /// URL of `action` on this view's path
    pub fn url_for_action(
        &self,
        action: &str,
        key: Option<&Key>,
        ancestor_key: Option<&Key>,
        extra: &RequestArgs,
    ) -> Option<String> {
        let view = self.host.registry().get(&self.definition.path(), action)?;
        self.url_for_view(view, key, ancestor_key, extra)
    }

    /// The listing an instance belongs to, else the admin index
    pub fn list_url_or_index(&self, parent: Option<&Key>, extra: &RequestArgs) -> String {
        self.url_for_action("list", None, parent, extra)
            .unwrap_or_else(|| self.host.index_url())
    }

    /// Breadcrumbs for `key` and its ancestors, root first
    pub async fn ancestor_crumbs(&self, key: Option<&Key>) -> Result<Vec<Crumb>, StorageError> {
        let Some(key) = key else {
            return Ok(Vec::new());
        };
        let lineage = load_lineage(self.host.store().as_ref(), key).await?;
        let schemas = self.definition.ancestor_schemas();
        Ok(lineage
            .into_iter()
            .enumerate()
            .map(|(depth, (key, entity))| {
                let label = match (schemas.get(depth), entity) {
                    (Some(schema), Some(entity)) => schema.label_for(&entity),
                    _ => key.to_string(),
                };
                let url = self.host.url_for(&key.path(), "edit", Some(&key), None);
                Crumb { key, label, url }
            })
            .collect())
    }

    /// Buttons for the views the user may run with the given keys
    pub async fn action_buttons(
        &self,
        views: &[Arc<ViewDefinition>],
        key: Option<&Key>,
        ancestor_key: Option<&Key>,
    ) -> Vec<ActionButton> {
        let checks = views.iter().map(|view| async move {
            let url = self.url_for_view(view, key, ancestor_key, &RequestArgs::new())?;
            if !self.view_permitted(view, key).await {
                return None;
            }
            Some(self.button_for(view, url))
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    fn button_for(&self, view: &ViewDefinition, url: String) -> ActionButton {
        ActionButton {
            action: view.action().to_string(),
            label: title_case(view.action()),
            url,
            icon: view.icon().map(str::to_string),
            class: view.class().to_string(),
        }
    }

    /// Context shared by every template
    pub async fn base_context(&self) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("view", &self.definition.summary(self.host.labels()));
        context.insert("is_popup", &self.request.is_popup());
        context.insert("is_embed", &self.request.is_embed());
        context.insert("request_url", &self.request.full_url());
        context.insert("kibble", &self.host.site_summary(&self.request.auth).await);
        context
    }

    /// Render the first existing template of the chain
    pub fn render(&self, templates: &[String], context: &tera::Context) -> Result<Response, KibbleError> {
        self.host.render(templates, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::NoAuthProvider;
    use crate::server::KibbleBuilder;
    use crate::storage::InMemoryDatastore;
    use crate::views::standard_views;

    fn author() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("Author"))
    }

    fn book_list_view(request: RequestState) -> KibbleView {
        let book = Arc::new(ModelSchema::new("Book"));
        let host = KibbleBuilder::new()
            .with_datastore(InMemoryDatastore::new())
            .with_authenticator(NoAuthProvider)
            .register_views(standard_views(author(), vec![]))
            .register_view(
                ViewDefinition::list(book.clone())
                    .ancestors(vec![author()])
                    .linked_actions(["create", "edit", "delete", "Author:list", "Nope:list", "bogus"]),
            )
            .register_view(ViewDefinition::create(book.clone()).ancestors(vec![author()]))
            .register_view(ViewDefinition::edit(book.clone()).ancestors(vec![author()]))
            .register_view(ViewDefinition::delete(book).ancestors(vec![author()]))
            .build_host()
            .unwrap();
        let host = Arc::new(host);
        let definition = host.registry().get("Author/Book", "list").unwrap().clone();
        KibbleView::new(host, definition, request)
    }

    fn names(views: &[Arc<ViewDefinition>]) -> Vec<String> {
        views.iter().map(|v| format!("{}:{}", v.path(), v.action())).collect()
    }

    #[test]
    fn test_unknown_linked_actions_are_dropped() {
        let view = book_list_view(RequestState::get("/admin/author-1/book/"));
        assert_eq!(
            names(&view.linked_actions()),
            vec!["Author/Book:create", "Author/Book:edit", "Author/Book:delete", "Author:list"]
        );
    }

    #[test]
    fn test_actions_split_by_what_they_need() {
        let view = book_list_view(RequestState::get("/admin/author-1/book/"));
        assert_eq!(names(&view.ancestor_actions()), vec!["Author/Book:create", "Author/Book:edit"]);
        assert_eq!(names(&view.instance_actions()), vec!["Author/Book:edit", "Author/Book:delete"]);
    }

    #[test]
    fn test_links_keep_popup_and_drop_embed() {
        let view = book_list_view(RequestState::get("/admin/author-1/book/").with_query("_popup=1&_embed=1"));
        let author_list = view.host().registry().get("Author", "list").unwrap().clone();

        assert_eq!(
            view.url_for_view(&author_list, None, None, &RequestArgs::new()),
            Some("/admin/author/?_popup=1".to_string())
        );

        let mut extra = RequestArgs::new();
        extra.insert("_embed", "1");
        assert_eq!(
            view.url_for_view(&author_list, None, None, &extra),
            Some("/admin/author/?_embed=1&_popup=1".to_string())
        );
    }

    #[tokio::test]
    async fn test_instance_buttons_link_to_the_instance() {
        let view = book_list_view(RequestState::get("/admin/author-1/book/"));
        let author_key = Key::new("Author", 1);
        let key = author_key.child("Book", 2);

        let buttons = view
            .action_buttons(&view.instance_actions(), Some(&key), None)
            .await;
        let urls: Vec<_> = buttons.iter().map(|b| (b.label.as_str(), b.url.as_str())).collect();
        assert_eq!(
            urls,
            vec![("Edit", "/admin/author-1/book-2/"), ("Delete", "/admin/author-1/book-2/delete/")]
        );
        assert_eq!(buttons[1].class, "btn-danger");

        // Edit and delete need a key, so the ancestor bar only offers create
        let buttons = view
            .action_buttons(&view.ancestor_actions(), None, Some(&author_key))
            .await;
        let actions: Vec<_> = buttons.iter().map(|b| b.action.as_str()).collect();
        assert_eq!(actions, vec!["create"]);
        assert_eq!(buttons[0].url, "/admin/author-1/book/new/");
    }
}
