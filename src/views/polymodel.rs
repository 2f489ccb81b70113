//! Subtype selection for polymorphic models
//!
//! A create view over a polymorphic model first asks which subclass to
//! create, then renders that subclass's form. An edit view picks the form
//! from the class chain stored on the instance.

use crate::core::error::KibbleError;
use crate::core::model::{Entity, ModelSchema};
use crate::core::request::RequestArgs;
use crate::views::controller::KibbleView;
use crate::views::label_for_schema;
use axum::response::Response;
use serde::Serialize;
use std::sync::Arc;

/// Query argument naming the subclass to create
pub const CLASS_ARG: &str = "class";

pub const PICKER_TEMPLATE: &str = "kibble/polymodel/picker.html";

/// One entry of the subclass picker
#[derive(Debug, Clone, Serialize)]
pub struct SubtypeChoice {
    pub label: String,
    pub url: String,
}

/// The subtype named by the request's `class` argument
pub fn pick_class(subtypes: &[Arc<ModelSchema>], args: &RequestArgs) -> Option<Arc<ModelSchema>> {
    let wanted = args.get(CLASS_ARG)?;
    subtypes.iter().find(|s| s.class_name() == wanted).cloned()
}

/// The schema whose class chain matches the instance exactly
///
/// The base model counts as a candidate, so instances of the root class
/// still get a form.
pub fn schema_for_instance(
    base: &Arc<ModelSchema>,
    subtypes: &[Arc<ModelSchema>],
    instance: &Entity,
) -> Option<Arc<ModelSchema>> {
    if subtypes.is_empty() {
        return Some(base.clone());
    }
    let class_key = instance.class_key();
    std::iter::once(base)
        .chain(subtypes.iter())
        .find(|schema| schema.class_key().iter().map(String::as_str).eq(class_key.iter().copied()))
        .cloned()
}

/// Render the page asking which subclass to create
pub async fn render_picker(view: &KibbleView, subtypes: &[Arc<ModelSchema>]) -> Result<Response, KibbleError> {
    let request = view.request();
    let ancestor_key = request.view_args.ancestor_key.as_ref();
    let labels = view.host().labels();

    let sub_views: Vec<SubtypeChoice> = subtypes
        .iter()
        .filter_map(|subtype| {
            let args = RequestArgs::new().with(CLASS_ARG, subtype.class_name());
            let url = view.url_for(None, ancestor_key, &args)?;
            Some(SubtypeChoice {
                label: label_for_schema(labels, subtype),
                url,
            })
        })
        .collect();

    let mut context = view.base_context().await;
    context.insert("sub_views", &sub_views);
    context.insert("ancestors", &view.ancestor_crumbs(ancestor_key).await?);
    view.render(&[PICKER_TEMPLATE.to_string()], &context)
}
