//! Form generation and binding
//!
//! A [`ModelConverter`] turns a [`ModelSchema`](crate::core::ModelSchema)
//! into a [`FormDefinition`]; a [`BoundForm`] carries that definition
//! together with submitted or stored values through validation and back
//! onto an entity.

pub mod binding;
pub mod converter;

pub use binding::{BoundField, BoundForm, KeyChoices, SelectChoice, preload_key_choices};
pub use converter::{
    DefaultModelConverter, FieldArgs, FormOptions, KibbleModelConverter, ModelConverter,
};

use crate::core::field::{FieldFormat, FieldValue};
use std::sync::Arc;

/// How a repeated property is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListWidget {
    /// One entry after another
    #[default]
    Stacked,
    /// A table with one row per entry and an empty row template
    Tabular,
}

/// The input a form field accepts
#[derive(Debug, Clone)]
pub enum FieldKind {
    Text { format: Option<FieldFormat> },
    TextArea,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Select { choices: Vec<String> },
    /// Reference to another entity; choices are loaded per request
    KeySelect { kind: Option<String> },
    Hidden,
    /// A nested form for a structured property
    Subform(Arc<FormDefinition>),
    /// Repeated entries of one field
    List {
        entry: Box<FormField>,
        widget: ListWidget,
    },
}

impl FieldKind {
    /// Widget name used by the field templates
    pub fn widget(&self) -> &'static str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::TextArea => "textarea",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "checkbox",
            FieldKind::DateTime => "datetime",
            FieldKind::Date => "date",
            FieldKind::Select { .. } => "select",
            FieldKind::KeySelect { .. } => "key_select",
            FieldKind::Hidden => "hidden",
            FieldKind::Subform(_) => "subform",
            FieldKind::List {
                widget: ListWidget::Stacked,
                ..
            } => "list",
            FieldKind::List {
                widget: ListWidget::Tabular,
                ..
            } => "tabular_list",
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, FieldKind::Hidden)
    }
}

/// One field of a generated form
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub help_text: Option<String>,
    pub required: bool,
    pub default: Option<FieldValue>,
    pub kind: FieldKind,
}

impl FormField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            label: crate::core::labels::title_case(&name),
            name,
            help_text: None,
            required: false,
            default: None,
            kind,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }
}

/// An ordered set of form fields
#[derive(Debug, Clone, Default)]
pub struct FormDefinition {
    fields: Vec<FormField>,
}

impl FormDefinition {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn push(&mut self, field: FormField) {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
    }
}
