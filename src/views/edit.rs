//! Create and edit views
//!
//! Both render a form built from the model schema and, on a valid POST,
//! write the instance inside a retried transaction. They differ only in
//! where the instance comes from: edit loads it by key, create starts a
//! fresh one under the optional ancestor.

use crate::core::datastore::Datastore;
use crate::core::error::{KibbleError, RequestError, StorageError};
use crate::core::events::ActionEvent;
use crate::core::key::Key;
use crate::core::model::{Entity, ModelSchema};
use crate::core::request::RequestArgs;
use crate::forms::{BoundField, BoundForm, FormOptions, ModelConverter, preload_key_choices};
use crate::views::controller::{InstanceSummary, KibbleView};
use crate::views::polymodel;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use std::sync::Arc;

pub const DISMISS_POPUP_TEMPLATE: &str = "kibble/dismiss_popup.html";

/// Form argument choosing where to go after a successful save
pub const CONTINUE_ARG: &str = "__continue";

/// A named group of form fields
#[derive(Debug, Clone, Default)]
pub struct Fieldset {
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl Fieldset {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: Some(name.into()),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Options of create and edit views
#[derive(Clone)]
pub struct FormViewOptions {
    pub form: FormOptions,
    pub fieldsets: Vec<Fieldset>,
    /// Text shown above the form
    pub help_text: Option<String>,
    /// Overrides the host's converter for this view
    pub converter: Option<Arc<dyn ModelConverter>>,
    /// Subclasses of a polymorphic model the view can create or edit
    pub subtypes: Vec<Arc<ModelSchema>>,
    /// How often a conflicting save is retried
    pub transaction_retries: usize,
}

impl Default for FormViewOptions {
    fn default() -> Self {
        Self {
            form: FormOptions::default(),
            fieldsets: Vec::new(),
            help_text: None,
            converter: None,
            subtypes: Vec::new(),
            transaction_retries: 3,
        }
    }
}

impl FormViewOptions {
    pub fn form(mut self, form: FormOptions) -> Self {
        self.form = form;
        self
    }

    pub fn fieldsets(mut self, fieldsets: Vec<Fieldset>) -> Self {
        self.fieldsets = fieldsets;
        self
    }

    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    pub fn converter(mut self, converter: Arc<dyn ModelConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn subtypes<I>(mut self, subtypes: I) -> Self
    where
        I: IntoIterator<Item = Arc<ModelSchema>>,
    {
        self.subtypes = subtypes.into_iter().collect();
        self
    }

    pub fn transaction_retries(mut self, retries: usize) -> Self {
        self.transaction_retries = retries;
        self
    }
}

/// A fieldset with its bound fields, as templates see it
#[derive(Debug, Clone, Serialize)]
pub struct FieldsetView {
    pub name: Option<String>,
    pub fields: Vec<BoundField>,
}

/// Group bound fields for display
///
/// Configured fieldsets keep the fields the form actually has; empty ones
/// are dropped. Visible fields no fieldset names end up in a trailing
/// unnamed fieldset. Hidden fields outside any fieldset are returned
/// separately.
pub fn group_fields(fields: &[BoundField], configured: &[Fieldset]) -> (Vec<FieldsetView>, Vec<BoundField>) {
    let find = |name: &str| fields.iter().find(|f| f.short_name() == name);

    let mut groups: Vec<FieldsetView> = configured
        .iter()
        .map(|fieldset| FieldsetView {
            name: fieldset.name.clone(),
            fields: fieldset.fields.iter().filter_map(|n| find(n)).cloned().collect(),
        })
        .filter(|group| !group.fields.is_empty())
        .collect();

    let claimed = |field: &BoundField| {
        configured
            .iter()
            .any(|fs| fs.fields.iter().any(|n| n == field.short_name()))
    };
    let (hidden, remaining): (Vec<BoundField>, Vec<BoundField>) = fields
        .iter()
        .filter(|f| !claimed(f))
        .cloned()
        .partition(BoundField::is_hidden);

    if !remaining.is_empty() {
        groups.push(FieldsetView {
            name: None,
            fields: remaining,
        });
    }
    (groups, hidden)
}

/// Write the form's values in a transaction
///
/// The stored instance is re-read on every attempt, so a retry applies the
/// form on top of whatever the conflicting writer left behind.
pub async fn save_model(
    store: &dyn Datastore,
    schema: &ModelSchema,
    form: &BoundForm,
    key: Option<&Key>,
    ancestor_key: Option<&Key>,
    retries: usize,
) -> Result<Entity, StorageError> {
    let mut attempt = 0;
    loop {
        let mut entity = match key {
            Some(key) => store.get(key).await?.ok_or_else(|| StorageError::InvalidEntity {
                message: format!("{} no longer exists", key),
            })?,
            None => schema.new_entity(ancestor_key.cloned()),
        };
        form.populate(&mut entity);

        match store.put(entity.clone()).await {
            Ok(saved) => {
                if entity.id().is_none() {
                    entity.assign_id(saved.id().clone());
                }
                return Ok(entity);
            }
            Err(StorageError::Conflict { key }) if attempt < retries => {
                attempt += 1;
                tracing::debug!(key = %key, attempt, "retrying conflicting save");
            }
            Err(err) => return Err(err),
        }
    }
}

/// The create view: pick a subclass if needed, then run the form
pub async fn dispatch_create(view: &KibbleView, options: &FormViewOptions) -> Result<Response, KibbleError> {
    let schema = if options.subtypes.is_empty() {
        view.definition().model().clone()
    } else {
        match polymodel::pick_class(&options.subtypes, &view.request().args) {
            Some(schema) => schema,
            None => return polymodel::render_picker(view, &options.subtypes).await,
        }
    };
    let ancestor_key = view.request().view_args.ancestor_key.clone();
    form_view(view, options, schema, None, ancestor_key).await
}

/// The edit view: load the instance or answer 404
pub async fn dispatch_edit(view: &KibbleView, options: &FormViewOptions) -> Result<Response, KibbleError> {
    let not_found = || RequestError::NotFound {
        path: view.request().path.clone(),
    };
    let key = view.request().view_args.key.clone().ok_or_else(not_found)?;
    let instance = view.host().store().get(&key).await?.ok_or_else(not_found)?;

    let schema = polymodel::schema_for_instance(view.definition().model(), &options.subtypes, &instance)
        .ok_or_else(not_found)?;
    let ancestor_key = key.parent();
    form_view(view, options, schema, Some(instance), ancestor_key).await
}

async fn form_view(
    view: &KibbleView,
    options: &FormViewOptions,
    schema: Arc<ModelSchema>,
    instance: Option<Entity>,
    ancestor_key: Option<Key>,
) -> Result<Response, KibbleError> {
    let host = view.host();
    let converter = options.converter.clone().unwrap_or_else(|| host.converter());
    let definition = Arc::new(converter.model_form(&schema, &options.form));
    let request = view.request();

    let form = if request.is_post() {
        let mut form = BoundForm::from_request(definition, &request.form);
        if form.validate() {
            let key = instance.as_ref().and_then(Entity::key);
            let event = ActionEvent::pre(view.definition().action(), view.definition().path())
                .with_key(key.clone())
                .with_ancestor(ancestor_key.clone());
            host.events().publish(event.clone());

            let saved = save_model(
                host.store().as_ref(),
                &schema,
                &form,
                key.as_ref(),
                ancestor_key.as_ref(),
                options.transaction_retries,
            )
            .await?;
            host.events().publish(event.committed(saved.key()));

            tracing::info!(
                "{} '{}' saved.",
                crate::views::label_for_schema(host.labels(), &schema),
                schema.label_for(&saved)
            );
            return success_response(view, &schema, &saved).await;
        }
        tracing::debug!(errors = ?form.errors(), "form did not validate");
        form
    } else {
        BoundForm::from_entity(definition, instance.as_ref())
    };

    render_form(view, options, &schema, form, instance.as_ref(), ancestor_key.as_ref()).await
}

async fn render_form(
    view: &KibbleView,
    options: &FormViewOptions,
    schema: &ModelSchema,
    mut form: BoundForm,
    instance: Option<&Entity>,
    ancestor_key: Option<&Key>,
) -> Result<Response, KibbleError> {
    let host = view.host();
    let choices = preload_key_choices(form.definition(), host.store(), host.schemas()).await;
    form.apply_key_choices(&choices);

    let (fieldsets, hidden_fields) = group_fields(form.fields(), &options.fieldsets);
    let instance_key = instance.and_then(Entity::key);
    let crumb_key = instance_key.as_ref().or(ancestor_key);

    let mut context = view.base_context().await;
    context.insert("form", form.fields());
    context.insert("errors", &form.errors());
    context.insert("fieldsets", &fieldsets);
    context.insert("hidden_fields", &hidden_fields);
    context.insert("help_text", &options.help_text);
    context.insert("instance", &instance.map(|e| InstanceSummary::new(schema, e)));
    context.insert("ancestors", &view.ancestor_crumbs(crumb_key).await?);
    let instance_actions = match &instance_key {
        Some(key) => view.action_buttons(&view.instance_actions(), Some(key), None).await,
        None => Vec::new(),
    };
    context.insert("instance_actions", &instance_actions);
    context.insert("list_url", &view.list_url_or_index(ancestor_key, &RequestArgs::new()));

    view.render(&view.templates(), &context)
}

async fn success_response(view: &KibbleView, schema: &ModelSchema, saved: &Entity) -> Result<Response, KibbleError> {
    let request = view.request();
    let key = saved.key();
    let mut args = RequestArgs::new();
    if request.is_embed() {
        args.insert("_embed", "1");
    }

    let next = match request.form.get(CONTINUE_ARG) {
        Some("edit") => view.url_for_action("edit", key.as_ref(), None, &args),
        Some("new") => view.url_for_action("create", None, saved.parent(), &args),
        _ => None,
    };
    if let Some(url) = next {
        return Ok(Redirect::to(&url).into_response());
    }

    if request.is_popup() {
        let mut context = view.base_context().await;
        context.insert("instance", &InstanceSummary::new(schema, saved));
        return view.render(&[DISMISS_POPUP_TEMPLATE.to_string()], &context);
    }

    let url = view.list_url_or_index(saved.parent(), &args);
    Ok(Redirect::to(&url).into_response())
}
