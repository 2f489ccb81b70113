//! Operations on one instance
//!
//! An operation loads the instance addressed by the URL, optionally asks
//! for confirmation, runs an [`OperationRunner`] and redirects back to the
//! listing the instance belongs to.

use crate::core::datastore::Datastore;
use crate::core::error::{KibbleError, RequestError};
use crate::core::events::ActionEvent;
use crate::core::model::Entity;
use crate::core::request::RequestArgs;
use crate::forms::BoundForm;
use crate::views::controller::{InstanceSummary, KibbleView};
use crate::views::edit::{Fieldset, group_fields};
use async_trait::async_trait;
use axum::response::{IntoResponse, Redirect, Response};
use std::fmt;
use std::sync::Arc;

/// Failure reported by a runner; the message is shown to the user
#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub message: String,
}

impl OperationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OperationFailure {}

/// What a successful run leaves the view to do
pub enum OperationOutcome {
    /// Redirect back to the listing
    Done,
    /// Send this response instead
    Response(Response),
}

/// The work an operation does on its instance
#[async_trait]
pub trait OperationRunner: Send + Sync {
    async fn run(&self, store: &dyn Datastore, instance: &Entity) -> Result<OperationOutcome, OperationFailure>;
}

/// Deletes the instance
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteRunner;

#[async_trait]
impl OperationRunner for DeleteRunner {
    async fn run(&self, store: &dyn Datastore, instance: &Entity) -> Result<OperationOutcome, OperationFailure> {
        let key = instance
            .key()
            .ok_or_else(|| OperationFailure::new("instance has no key"))?;
        store
            .delete(&key)
            .await
            .map_err(|e| OperationFailure::new(e.to_string()))?;
        Ok(OperationOutcome::Done)
    }
}

/// Options of an operation view
#[derive(Clone)]
pub struct OperationOptions {
    pub runner: Arc<dyn OperationRunner>,
    /// Past tense of the action for the success message, e.g. `deleted`
    pub past_tense: Option<String>,
    /// Ask before running on GET; POST always runs
    pub require_confirmation: bool,
    /// Instance fields shown on the confirmation page
    pub fieldsets: Vec<Fieldset>,
}

impl OperationOptions {
    pub fn new(runner: Arc<dyn OperationRunner>, past_tense: impl Into<String>) -> Self {
        Self {
            runner,
            past_tense: Some(past_tense.into()),
            require_confirmation: false,
            fieldsets: Vec::new(),
        }
    }

    pub fn require_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }

    pub fn fieldsets(mut self, fieldsets: Vec<Fieldset>) -> Self {
        self.fieldsets = fieldsets;
        self
    }
}

pub async fn dispatch(view: &KibbleView, options: &OperationOptions) -> Result<Response, KibbleError> {
    let request = view.request();
    let not_found = || RequestError::NotFound {
        path: request.path.clone(),
    };
    let key = request.view_args.key.clone().ok_or_else(not_found)?;
    let host = view.host();
    let instance = host.store().get(&key).await?.ok_or_else(not_found)?;

    let definition = view.definition();
    let schema = definition.model();
    let action = definition.action();
    let label = schema.label_for(&instance);

    if !options.require_confirmation || request.is_post() {
        let event = ActionEvent::pre(action, definition.path())
            .with_key(Some(key.clone()))
            .with_ancestor(key.parent());
        host.events().publish(event.clone());

        match options.runner.run(host.store().as_ref(), &instance).await {
            Ok(outcome) => {
                host.events().publish(event.committed(None));
                let done = options.past_tense.as_deref().unwrap_or(action);
                tracing::info!("Successfully {} {}", done, label);
                if let OperationOutcome::Response(response) = outcome {
                    return Ok(response);
                }
            }
            Err(failure) => {
                tracing::info!("Failed to {} {}: {}", action, label, failure);
            }
        }
        let url = view.list_url_or_index(key.parent().as_ref(), &RequestArgs::new());
        return Ok(Redirect::to(&url).into_response());
    }

    let converter = host.converter();
    let form = BoundForm::from_entity(
        Arc::new(converter.model_form(schema, &Default::default())),
        Some(&instance),
    );
    let (fieldsets, _) = group_fields(form.fields(), &options.fieldsets);

    let mut context = view.base_context().await;
    context.insert("instance", &InstanceSummary::new(schema, &instance));
    context.insert("fieldsets", &fieldsets);
    context.insert("ancestors", &view.ancestor_crumbs(Some(&key)).await?);
    context.insert(
        "cancel_url",
        &view
            .url_for_action("edit", Some(&key), None, &RequestArgs::new())
            .unwrap_or_else(|| view.list_url_or_index(key.parent().as_ref(), &RequestArgs::new())),
    );
    view.render(&view.templates(), &context)
}
