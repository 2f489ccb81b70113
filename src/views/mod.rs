//! Admin view definitions
//!
//! A [`ViewDefinition`] is the static descriptor of one action on one model:
//! which model and ancestors it acts on, the URLs it answers, the links it
//! offers and the behaviour it runs. Definitions are built at startup,
//! registered once and never change afterwards; a
//! [`KibbleView`](controller::KibbleView) is created from one for every
//! request it serves.

pub mod controller;
pub mod edit;
pub mod list;
pub mod operation;
pub mod polymodel;
pub mod url;

pub use controller::{ActionButton, KibbleView};
pub use edit::{Fieldset, FormViewOptions};
pub use list::{ListColumn, ListOptions, Table};
pub use operation::{DeleteRunner, OperationFailure, OperationOptions, OperationOutcome, OperationRunner};
pub use url::{CompiledPattern, UrlPattern};

use crate::core::error::ConfigError;
use crate::core::key::Key;
use crate::core::labels::LabelService;
use crate::core::model::ModelSchema;
use crate::core::request::ViewArgs;
use crate::views::url::PatternContext;
use axum::http::Method;
use serde::Serialize;
use std::sync::Arc;

/// What a view does when dispatched
pub enum ViewBehavior {
    List(ListOptions),
    Create(FormViewOptions),
    Edit(FormViewOptions),
    Operation(OperationOptions),
}

impl ViewBehavior {
    pub fn name(&self) -> &'static str {
        match self {
            ViewBehavior::List(_) => "list",
            ViewBehavior::Create(_) => "create",
            ViewBehavior::Edit(_) => "edit",
            ViewBehavior::Operation(_) => "operation",
        }
    }
}

/// Static descriptor of one action on one model
pub struct ViewDefinition {
    model: Arc<ModelSchema>,
    action: String,
    ancestors: Vec<Arc<ModelSchema>>,
    hidden: bool,
    linked_actions: Vec<String>,
    button_icon: Option<String>,
    button_class: String,
    url_patterns: Vec<UrlPattern>,
    methods: Vec<Method>,
    requires_instance: bool,
    requires_ancestor: bool,
    behavior: ViewBehavior,
    compiled: Vec<CompiledPattern>,
}

impl std::fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("path", &self.path())
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl ViewDefinition {
    fn new(model: Arc<ModelSchema>, action: impl Into<String>, behavior: ViewBehavior) -> Self {
        Self {
            model,
            action: action.into(),
            ancestors: Vec::new(),
            hidden: false,
            linked_actions: Vec::new(),
            button_icon: None,
            button_class: "btn-default".to_string(),
            url_patterns: vec![UrlPattern::new("/{kind_lower}/{action}/")],
            methods: vec![Method::GET],
            requires_instance: true,
            requires_ancestor: false,
            behavior,
            compiled: Vec::new(),
        }
    }

    /// The paginated listing of a model
    pub fn list(model: Arc<ModelSchema>) -> Self {
        let mut view = Self::new(model, "list", ViewBehavior::List(ListOptions::default()));
        view.button_icon = Some("list".to_string());
        view.requires_instance = false;
        view.url_patterns = vec![
            UrlPattern::new("/{kind_lower}/").with_default_page(1),
            UrlPattern::new("/{kind_lower}/page-<int:page>/"),
            UrlPattern::new("/{ancestor_key}/{kind_lower}/").with_default_page(1),
            UrlPattern::new("/{ancestor_key}/{kind_lower}/page-<int:page>/"),
        ];
        view
    }

    /// The form creating new instances, optionally under an ancestor
    pub fn create(model: Arc<ModelSchema>) -> Self {
        let mut view = Self::new(model, "create", ViewBehavior::Create(FormViewOptions::default()));
        view.button_icon = Some("plus-sign".to_string());
        view.requires_instance = false;
        view.requires_ancestor = true;
        view.methods = vec![Method::GET, Method::POST];
        view.url_patterns = vec![
            UrlPattern::new("/{kind_lower}/new/"),
            UrlPattern::new("/{ancestor_key}/{kind_lower}/new/"),
        ];
        view
    }

    /// The form editing one instance
    pub fn edit(model: Arc<ModelSchema>) -> Self {
        let mut view = Self::new(model, "edit", ViewBehavior::Edit(FormViewOptions::default()));
        view.button_icon = Some("pencil".to_string());
        view.requires_ancestor = true;
        view.methods = vec![Method::GET, Method::POST];
        view.url_patterns = vec![UrlPattern::new("/{key}/")];
        view
    }

    /// An operation run against one instance
    pub fn operation(model: Arc<ModelSchema>, action: impl Into<String>, options: OperationOptions) -> Self {
        let mut view = Self::new(model, action, ViewBehavior::Operation(options));
        view.methods = vec![Method::GET, Method::POST];
        view.url_patterns = vec![UrlPattern::new("/{key}/{action}/")];
        view
    }

    /// The confirmed deletion of one instance
    pub fn delete(model: Arc<ModelSchema>) -> Self {
        let options = OperationOptions::new(Arc::new(DeleteRunner), "deleted").require_confirmation(true);
        let mut view = Self::operation(model, "delete", options);
        view.button_icon = Some("trash".to_string());
        view.button_class = "btn-danger".to_string();
        view
    }

    pub fn ancestors<I>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = Arc<ModelSchema>>,
    {
        self.ancestors = ancestors.into_iter().collect();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Views this one links to: `"action"` on the same path, or `"Path:action"`
    pub fn linked_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn button_icon(mut self, icon: impl Into<String>) -> Self {
        self.button_icon = Some(icon.into());
        self
    }

    pub fn button_class(mut self, class: impl Into<String>) -> Self {
        self.button_class = class.into();
        self
    }

    pub fn url_patterns(mut self, patterns: Vec<UrlPattern>) -> Self {
        self.url_patterns = patterns;
        self
    }

    /// Replace the options of a list view; ignored by other views
    pub fn with_list(mut self, options: ListOptions) -> Self {
        match &mut self.behavior {
            ViewBehavior::List(current) => *current = options,
            other => tracing::debug!(behavior = other.name(), "list options ignored"),
        }
        self
    }

    /// Replace the options of a create or edit view; ignored by other views
    pub fn with_form(mut self, options: FormViewOptions) -> Self {
        match &mut self.behavior {
            ViewBehavior::Create(current) | ViewBehavior::Edit(current) => *current = options,
            other => tracing::debug!(behavior = other.name(), "form options ignored"),
        }
        self
    }

    pub fn model(&self) -> &Arc<ModelSchema> {
        &self.model
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn kind(&self) -> &str {
        self.model.kind()
    }

    pub fn ancestor_schemas(&self) -> &[Arc<ModelSchema>] {
        &self.ancestors
    }

    pub fn ancestor_kinds(&self) -> Vec<String> {
        self.ancestors.iter().map(|a| a.kind().to_string()).collect()
    }

    /// Ancestor kinds and the kind, joined by `/`
    pub fn path(&self) -> String {
        let mut kinds = self.ancestor_kinds();
        kinds.push(self.kind().to_string());
        kinds.join("/")
    }

    pub fn view_name(&self) -> String {
        format!("{}_{}", self.path().to_lowercase().replace('/', "_"), self.action)
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn linked_action_refs(&self) -> &[String] {
        &self.linked_actions
    }

    pub fn icon(&self) -> Option<&str> {
        self.button_icon.as_deref()
    }

    pub fn class(&self) -> &str {
        &self.button_class
    }

    pub fn patterns(&self) -> &[UrlPattern] {
        &self.url_patterns
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method) || (*method == Method::HEAD && self.methods.contains(&Method::GET))
    }

    pub fn requires_instance(&self) -> bool {
        self.requires_instance
    }

    pub fn requires_ancestor(&self) -> bool {
        self.requires_ancestor
    }

    /// Whether links to this view need a key or an ancestor key
    pub fn ancestor_required(&self) -> bool {
        self.requires_ancestor && !self.ancestors.is_empty()
    }

    pub fn behavior(&self) -> &ViewBehavior {
        &self.behavior
    }

    /// Template chain, most specific first
    pub fn templates(&self) -> Vec<String> {
        let mut templates = vec![
            format!("kibble/{}/{}.html", self.path().to_lowercase(), self.action),
            format!("kibble/{}/{}.html", self.kind().to_lowercase(), self.action),
            format!("kibble/{}.html", self.action),
        ];
        if matches!(self.behavior, ViewBehavior::Operation(_)) {
            templates.push("kibble/operation.html".to_string());
        }
        templates.dedup();
        templates
    }

    pub fn kind_label(&self, labels: &LabelService) -> String {
        label_for_schema(labels, &self.model)
    }

    pub fn ancestor_labels(&self, labels: &LabelService) -> Vec<String> {
        self.ancestors.iter().map(|a| label_for_schema(labels, a)).collect()
    }

    /// Compile the URL patterns; called once on registration
    pub(crate) fn compile(&mut self) -> Result<(), ConfigError> {
        let ancestor_kinds = self.ancestor_kinds();
        let context = PatternContext {
            kind: self.model.kind(),
            action: &self.action,
            ancestor_kinds: &ancestor_kinds,
        };
        self.compiled = self
            .url_patterns
            .iter()
            .map(|pattern| CompiledPattern::compile(pattern, &context))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Match a path relative to the admin prefix
    pub fn match_path(&self, path: &str) -> Option<ViewArgs> {
        self.compiled.iter().find_map(|pattern| pattern.matches(path))
    }

    /// Path of the first pattern accepting the arguments, relative to the
    /// admin prefix
    ///
    /// Views without ancestors ignore the ancestor key, and views that need
    /// one return `None` when neither key is given.
    pub fn build_path(&self, key: Option<&Key>, ancestor_key: Option<&Key>, page: Option<usize>) -> Option<String> {
        if self.ancestors.is_empty() {
            return self.compiled.iter().find_map(|p| p.build(key, None, page));
        }
        if key.is_none() && ancestor_key.is_none() && self.ancestor_required() {
            return None;
        }
        self.compiled.iter().find_map(|p| p.build(key, ancestor_key, page))
    }

    /// Serializable summary for templates
    pub fn summary(&self, labels: &LabelService) -> ViewSummary {
        ViewSummary {
            kind: self.kind().to_string(),
            kind_label: self.kind_label(labels),
            action: self.action.clone(),
            action_label: crate::core::labels::title_case(&self.action),
            path: self.path(),
            view_name: self.view_name(),
            ancestor_labels: self.ancestor_labels(labels),
            button_icon: self.button_icon.clone(),
            button_class: self.button_class.clone(),
        }
    }
}

/// List, create, edit and delete views of one model, linked to each other
pub fn standard_views(model: Arc<ModelSchema>, ancestors: Vec<Arc<ModelSchema>>) -> Vec<ViewDefinition> {
    vec![
        ViewDefinition::list(model.clone())
            .ancestors(ancestors.clone())
            .linked_actions(["create", "edit", "delete"]),
        ViewDefinition::create(model.clone()).ancestors(ancestors.clone()),
        ViewDefinition::edit(model.clone())
            .ancestors(ancestors.clone())
            .linked_actions(["delete"]),
        ViewDefinition::delete(model).ancestors(ancestors),
    ]
}

/// Label of a model; polymorphic models use their class name
pub fn label_for_schema(labels: &LabelService, schema: &ModelSchema) -> String {
    if schema.is_polymorphic() {
        labels.label_for_kind(schema.class_name())
    } else {
        labels.label_for_kind(schema.kind())
    }
}

/// What templates see of a view
#[derive(Debug, Clone, Serialize)]
pub struct ViewSummary {
    pub kind: String,
    pub kind_label: String,
    pub action: String,
    pub action_label: String,
    pub path: String,
    pub view_name: String,
    pub ancestor_labels: Vec<String>,
    pub button_icon: Option<String>,
    pub button_class: String,
}
