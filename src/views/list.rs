//! The list view
//!
//! Runs the configured composers over the base query, fetches one page and
//! renders it as a table. When the datastore refuses the composed query for
//! lack of an index, the page still renders, empty, through
//! `kibble/list.need_index.html` so the user can change the filters.

use crate::core::error::{ConfigError, KibbleError, StorageError};
use crate::core::field::FieldValue;
use crate::core::key::Key;
use crate::core::labels::title_case;
use crate::core::model::{Entity, ModelSchema, PropertyPath};
use crate::core::query::{FetchOptions, Query};
use crate::core::request::RequestArgs;
use crate::query::composers::{
    ComposeInput, FilterComposer, Paginator, QueryComposer, SortComposer, SortField,
};
use crate::query::filters::QueryFilter;
use crate::views::controller::{ActionButton, KibbleView};
use axum::response::Response;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub const NEED_INDEX_TEMPLATE: &str = "kibble/list.need_index.html";

type ComputeFn = Arc<dyn Fn(&Entity) -> FieldValue + Send + Sync>;

/// A column of the list table
#[derive(Clone)]
pub enum ListColumn {
    /// The instance's display label
    Label,
    /// A (possibly nested) property
    Property {
        name: String,
        title: String,
        path: PropertyPath,
    },
    /// A value computed from the instance
    Computed {
        name: String,
        title: String,
        compute: ComputeFn,
    },
}

impl ListColumn {
    pub fn property(schema: &ModelSchema, name: &str) -> Result<Self, ConfigError> {
        Ok(ListColumn::Property {
            name: name.to_string(),
            title: title_case(name),
            path: schema.resolve(name)?,
        })
    }

    pub fn computed<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Entity) -> FieldValue + Send + Sync + 'static,
    {
        let name = name.into();
        ListColumn::Computed {
            title: title_case(&name),
            name,
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ListColumn::Label => "label",
            ListColumn::Property { name, .. } | ListColumn::Computed { name, .. } => name,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ListColumn::Label => "",
            ListColumn::Property { title, .. } | ListColumn::Computed { title, .. } => title,
        }
    }

    fn value(&self, schema: &ModelSchema, entity: &Entity) -> FieldValue {
        match self {
            ListColumn::Label => FieldValue::String(schema.label_for(entity)),
            ListColumn::Property { path, .. } => {
                let values = path.values(entity);
                match values.as_slice() {
                    [] => FieldValue::Null,
                    [single] if !path.is_repeated() => (*single).clone(),
                    many => FieldValue::List(many.iter().map(|v| (*v).clone()).collect()),
                }
            }
            ListColumn::Computed { compute, .. } => compute(entity),
        }
    }
}

impl fmt::Debug for ListColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListColumn({})", self.name())
    }
}

/// Composers a list view runs, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerKind {
    Sort,
    Filter,
    Paginator,
}

impl ComposerKind {
    fn build(&self, input: &ComposeInput, query: Query) -> Box<dyn QueryComposer> {
        match self {
            ComposerKind::Sort => Box::new(SortComposer::new(input, query)),
            ComposerKind::Filter => Box::new(FilterComposer::new(input, query)),
            ComposerKind::Paginator => Box::new(Paginator::new(input, query)),
        }
    }
}

/// Configuration of a list view
#[derive(Clone)]
pub struct ListOptions {
    pub columns: Vec<ListColumn>,
    /// Link the first column to the instance's edit view
    pub link_first: bool,
    pub filters: Vec<Arc<dyn QueryFilter>>,
    pub sortable: Vec<SortField>,
    pub composers: Vec<ComposerKind>,
    /// Overrides the site-wide page size
    pub page_size: Option<usize>,
    pub max_page_size: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            columns: vec![ListColumn::Label],
            link_first: true,
            filters: Vec::new(),
            sortable: Vec::new(),
            composers: vec![ComposerKind::Sort, ComposerKind::Filter, ComposerKind::Paginator],
            page_size: None,
            max_page_size: None,
        }
    }
}

impl ListOptions {
    pub fn columns(mut self, columns: Vec<ListColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn filter(mut self, filter: impl QueryFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Allow ordering by a property
    pub fn sortable(mut self, schema: &ModelSchema, name: &str) -> Result<Self, ConfigError> {
        self.sortable.push(SortField {
            name: name.to_string(),
            title: title_case(name),
            path: schema.resolve(name)?,
        });
        Ok(self)
    }

    pub fn composers(mut self, composers: Vec<ComposerKind>) -> Self {
        self.composers = composers;
        self
    }

    pub fn link_first(mut self, link_first: bool) -> Self {
        self.link_first = link_first;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = Some(max_page_size);
        self
    }
}

/// A rendered cell: markup for bools and nulls, escaped text otherwise
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Cell {
    pub html: String,
}

/// Format a value for the list table
pub fn display_value(value: &FieldValue) -> Cell {
    let html = match value {
        FieldValue::Boolean(true) => {
            r#"<span class="label label-success"><i class="glyphicon glyphicon-ok"></i></span>"#
                .to_string()
        }
        FieldValue::Boolean(false) => {
            r#"<span class="label label-danger"><i class="glyphicon glyphicon-remove"></i></span>"#
                .to_string()
        }
        FieldValue::Null => r#"<i class="text-muted">None</i>"#.to_string(),
        FieldValue::DateTime(dt) => tera::escape_html(&dt.format("%c").to_string()),
        FieldValue::Date(d) => tera::escape_html(&d.format("%x").to_string()),
        other => tera::escape_html(&other.to_string()),
    };
    Cell { html }
}

#[derive(Debug, Clone, Serialize)]
pub struct Header {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub key: Option<Key>,
    pub url: Option<String>,
    pub cells: Vec<Cell>,
    pub actions: Vec<ActionButton>,
}

/// The rows of one page
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub headers: Vec<Header>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl Table {
    pub fn empty(columns: &[ListColumn]) -> Self {
        Self {
            headers: headers(columns),
            rows: Vec::new(),
            row_count: 0,
        }
    }
}

fn headers(columns: &[ListColumn]) -> Vec<Header> {
    columns
        .iter()
        .map(|c| Header {
            name: c.name().to_string(),
            title: c.title().to_string(),
        })
        .collect()
}

async fn build_table(
    view: &KibbleView,
    options: &ListOptions,
    entities: Vec<Entity>,
) -> Table {
    let schema = view.definition().model().clone();
    let instance_actions = view.instance_actions();

    let rows = entities.iter().map(|entity| {
        let schema = schema.clone();
        let instance_actions = &instance_actions;
        async move {
            let key = entity.key();
            let url = key
                .as_ref()
                .filter(|_| options.link_first)
                .and_then(|k| view.url_for_action("edit", Some(k), None, &RequestArgs::new()));
            Row {
                cells: options
                    .columns
                    .iter()
                    .map(|column| display_value(&column.value(&schema, entity)))
                    .collect(),
                actions: view.action_buttons(instance_actions, key.as_ref(), None).await,
                url,
                key,
            }
        }
    });
    let rows: Vec<Row> = join_all(rows).await;

    Table {
        headers: headers(&options.columns),
        row_count: rows.len(),
        rows,
    }
}

/// Fetch and render one page of a listing
pub async fn dispatch(view: &KibbleView, options: &ListOptions) -> Result<Response, KibbleError> {
    let host = view.host();
    let definition = view.definition();
    let request = view.request();
    let ancestor_key = request.view_args.ancestor_key.clone();

    let mut query = Query::new(definition.kind());
    if let Some(ancestor) = &ancestor_key {
        query = query.ancestor(ancestor.clone());
    }

    let page_size = options.page_size.unwrap_or(host.config().page_size);
    let max_page_size = options.max_page_size.unwrap_or(host.config().max_page_size);
    let page_url = {
        let view = view.clone();
        let ancestor_key = ancestor_key.clone();
        let args = request.args.clone().without(Paginator::PAGE_ARG);
        Arc::new(move |page: usize| {
            view.url_for_page(view.definition(), None, ancestor_key.as_ref(), Some(page), &args)
        })
    };
    let input = ComposeInput {
        store: host.store(),
        request: request.clone(),
        filters: options.filters.clone(),
        sortable: options.sortable.clone(),
        page_size,
        max_page_size: max_page_size.max(page_size),
        page_url,
    };

    let mut composers = Vec::with_capacity(options.composers.len());
    for kind in &options.composers {
        let composer = kind.build(&input, query);
        query = composer.get_query();
        composers.push(composer);
    }

    let mut context = view.base_context().await;
    context.insert("ancestor_key", &ancestor_key);
    context.insert("ancestors", &view.ancestor_crumbs(ancestor_key.as_ref()).await?);
    context.insert(
        "ancestor_actions",
        &view
            .action_buttons(&view.ancestor_actions(), None, ancestor_key.as_ref())
            .await,
    );

    let listing = async {
        let mut params = FetchOptions::default();
        for composer in &composers {
            params = params.merge(composer.resolve_query_params().await?);
        }
        let entities = host.store().fetch(&query, params).await?;
        let mut composed = Vec::with_capacity(composers.len());
        for composer in &composers {
            composed.push((composer.context_var(), composer.context().await?));
        }
        Ok::<_, StorageError>((entities, composed))
    };

    match listing.await {
        Ok((entities, composed)) => {
            for (name, value) in composed {
                context.insert(name, &value);
            }
            context.insert("table", &build_table(view, options, entities).await);
            view.render(&view.templates(), &context)
        }
        Err(StorageError::NeedIndex { message }) => {
            tracing::debug!(view = %definition.view_name(), %message, "list query needs an index");
            let filters = FilterComposer::new(&input, Query::new(definition.kind()));
            context.insert("filters", &filters.context().await.unwrap_or_default());
            context.insert("sort", &Vec::<()>::new());
            context.insert("paginator", &Option::<()>::None);
            context.insert("table", &Table::empty(&options.columns));
            context.insert("index_message", &message);
            view.render(&[NEED_INDEX_TEMPLATE.to_string()], &context)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_display_value() {
        assert!(display_value(&FieldValue::Boolean(true)).html.contains("label-success"));
        assert!(display_value(&FieldValue::Boolean(false)).html.contains("label-danger"));
        assert_eq!(
            display_value(&FieldValue::Null).html,
            r#"<i class="text-muted">None</i>"#
        );
        assert_eq!(display_value(&FieldValue::from("<b>")).html, "&lt;b&gt;");

        let dt = Utc.with_ymd_and_hms(2023, 6, 15, 14, 0, 0).unwrap();
        assert_eq!(display_value(&FieldValue::DateTime(dt)).html, "Thu Jun 15 14:00:00 2023");
        let d = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
        assert_eq!(display_value(&FieldValue::Date(d)).html, "06&#x2F;15&#x2F;23");
    }

    #[test]
    fn test_column_values() {
        use crate::core::model::{PropertyDef, PropertyType};
        let schema = ModelSchema::new("Book")
            .property(PropertyDef::new("title", PropertyType::String))
            .property(PropertyDef::new("tags", PropertyType::String).repeated())
            .title_property("title");
        let entity = Entity::new("Book")
            .with("title", "Moby Dick")
            .with("tags", FieldValue::List(vec![FieldValue::from("sea")]));

        assert_eq!(ListColumn::Label.value(&schema, &entity), FieldValue::from("Moby Dick"));
        let tags = ListColumn::property(&schema, "tags").unwrap();
        assert_eq!(tags.title(), "Tags");
        assert_eq!(
            tags.value(&schema, &entity),
            FieldValue::List(vec![FieldValue::from("sea")])
        );
        let shout = ListColumn::computed("shout", |e: &Entity| {
            FieldValue::String(e.get("title").map(|t| t.to_string().to_uppercase()).unwrap_or_default())
        });
        assert_eq!(shout.value(&schema, &entity), FieldValue::from("MOBY DICK"));
        assert!(ListColumn::property(&schema, "missing").is_err());
    }
}
