//! Schema to form conversion

use crate::core::model::{ModelSchema, PropertyDef, PropertyType};
use crate::forms::{FieldKind, FormDefinition, FormField, ListWidget};
use indexmap::IndexMap;
use std::sync::Arc;

/// Per-field overrides applied during conversion
#[derive(Debug, Clone, Default)]
pub struct FieldArgs {
    pub label: Option<String>,
    pub help_text: Option<String>,
    pub required: Option<bool>,
    pub hidden: bool,
}

impl FieldArgs {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Which properties become form fields, and how
#[derive(Debug, Clone, Default)]
pub struct FormOptions {
    /// When set, only these properties, in this order
    pub only: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub field_args: IndexMap<String, FieldArgs>,
}

impl FormOptions {
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, name: impl Into<String>, args: FieldArgs) -> Self {
        self.field_args.insert(name.into(), args);
        self
    }

    fn selected<'a>(&self, schema: &'a ModelSchema) -> Vec<&'a PropertyDef> {
        let included = |prop: &&PropertyDef| !self.exclude.contains(&prop.name);
        match &self.only {
            Some(only) => only
                .iter()
                .filter_map(|name| schema.get_property(name))
                .filter(included)
                .collect(),
            None => schema.properties().iter().filter(included).collect(),
        }
    }
}

/// Maps schema properties onto form fields
///
/// Every conversion step is a provided method, so a converter only
/// overrides the property types it renders differently.
pub trait ModelConverter: Send + Sync {
    /// Build the form for a model
    fn model_form(&self, schema: &ModelSchema, options: &FormOptions) -> FormDefinition {
        let default_args = FieldArgs::default();
        let fields = options
            .selected(schema)
            .into_iter()
            .filter_map(|prop| {
                let args = options.field_args.get(&prop.name).unwrap_or(&default_args);
                let field = self.convert(prop, args);
                if field.is_none() {
                    tracing::debug!(
                        kind = schema.kind(),
                        property = %prop.name,
                        property_type = prop.property_type.name(),
                        "property has no form field"
                    );
                }
                field
            })
            .collect();
        FormDefinition::new(fields)
    }

    /// Convert one property; `None` leaves it out of the form
    fn convert(&self, prop: &PropertyDef, args: &FieldArgs) -> Option<FormField> {
        let kind = if args.hidden {
            FieldKind::Hidden
        } else if prop.repeated {
            self.convert_repeated(prop)?
        } else {
            self.convert_single(prop)?
        };

        let mut field = FormField::new(prop.name.clone(), kind)
            .label(args.label.clone().unwrap_or_else(|| prop.label()))
            .required(args.required.unwrap_or(prop.required));
        field.help_text = args.help_text.clone();
        field.default = prop.default.clone();
        Some(field)
    }

    fn convert_single(&self, prop: &PropertyDef) -> Option<FieldKind> {
        if let Some(choices) = &prop.choices {
            return Some(FieldKind::Select {
                choices: choices.clone(),
            });
        }
        Some(match &prop.property_type {
            PropertyType::String => FieldKind::Text {
                format: prop.format.clone(),
            },
            PropertyType::Text => FieldKind::TextArea,
            PropertyType::Integer => FieldKind::Integer,
            PropertyType::Float => FieldKind::Float,
            PropertyType::Boolean => FieldKind::Boolean,
            PropertyType::DateTime => FieldKind::DateTime,
            PropertyType::Date => FieldKind::Date,
            PropertyType::Key { kind } => FieldKind::KeySelect { kind: kind.clone() },
            PropertyType::Structured(schema) => self.convert_structured(schema),
            PropertyType::Generic => return None,
        })
    }

    fn convert_structured(&self, schema: &Arc<ModelSchema>) -> FieldKind {
        FieldKind::Subform(Arc::new(self.model_form(schema, &FormOptions::default())))
    }

    fn convert_repeated(&self, prop: &PropertyDef) -> Option<FieldKind> {
        let entry = FormField::new(prop.name.clone(), self.convert_single(prop)?).label(prop.label());
        Some(FieldKind::List {
            entry: Box::new(entry),
            widget: self.list_widget(prop),
        })
    }

    fn list_widget(&self, _prop: &PropertyDef) -> ListWidget {
        ListWidget::Stacked
    }
}

/// Plain conversion: every repeated property is a stacked list
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultModelConverter;

impl ModelConverter for DefaultModelConverter {}

/// The admin's converter: repeated structured properties render as tables
#[derive(Debug, Clone, Copy, Default)]
pub struct KibbleModelConverter;

impl ModelConverter for KibbleModelConverter {
    fn list_widget(&self, prop: &PropertyDef) -> ListWidget {
        match prop.property_type {
            PropertyType::Structured(_) => ListWidget::Tabular,
            _ => ListWidget::Stacked,
        }
    }
}
