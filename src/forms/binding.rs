//! Forms bound to values
//!
//! Field names are prefixed the way nested inputs are posted: a subform
//! field is `address-city`, a list entry `tags-0`, and a field inside a
//! list entry `addresses-1-city`.

use crate::core::datastore::Datastore;
use crate::core::field::FieldValue;
use crate::core::key::Key;
use crate::core::model::{Entity, ModelSchema};
use crate::core::query::{FetchOptions, Query};
use crate::core::request::RequestArgs;
use crate::forms::{FieldKind, FormDefinition, FormField, ListWidget};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

const REQUIRED_MESSAGE: &str = "This field is required.";
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// Choices of key-select fields, per referenced kind: `(urlsafe, label)`
pub type KeyChoices = IndexMap<String, Vec<(String, String)>>;

/// Most entities offered by one key-select field
const KEY_CHOICE_LIMIT: usize = 1000;

/// Load the selectable entities of every key-select field in the form
///
/// One task is spawned per referenced kind. A kind that fails to load is
/// left without choices.
pub async fn preload_key_choices(
    definition: &FormDefinition,
    store: Arc<dyn Datastore>,
    schemas: &IndexMap<String, Arc<ModelSchema>>,
) -> KeyChoices {
    let mut kinds = BTreeSet::new();
    collect_key_kinds(definition.fields(), &mut kinds);

    let tasks: Vec<_> = kinds
        .into_iter()
        .map(|kind| {
            let store = store.clone();
            let schema = schemas.get(&kind).cloned();
            tokio::spawn(async move {
                let query = Query::new(kind.clone());
                let result = store
                    .fetch(&query, FetchOptions::page(KEY_CHOICE_LIMIT, 0))
                    .await;
                (kind, schema, result)
            })
        })
        .collect();

    let mut choices = KeyChoices::new();
    for joined in futures::future::join_all(tasks).await {
        let Ok((kind, schema, result)) = joined else {
            tracing::debug!("key choice task was cancelled");
            continue;
        };
        match result {
            Ok(entities) => {
                let options = entities
                    .iter()
                    .filter_map(|entity| {
                        let key = entity.key()?;
                        let label = match &schema {
                            Some(schema) => schema.label_for(entity),
                            None => key.to_string(),
                        };
                        Some((key.urlsafe(), label))
                    })
                    .collect();
                choices.insert(kind, options);
            }
            Err(e) => tracing::debug!(kind = %kind, error = %e, "failed to load key choices"),
        }
    }
    choices
}

fn collect_key_kinds(fields: &[FormField], kinds: &mut BTreeSet<String>) {
    for field in fields {
        match &field.kind {
            FieldKind::KeySelect { kind: Some(kind) } => {
                kinds.insert(kind.clone());
            }
            FieldKind::Subform(definition) => collect_key_kinds(definition.fields(), kinds),
            FieldKind::List { entry, .. } => collect_key_kinds(std::slice::from_ref(entry), kinds),
            _ => {}
        }
    }
}

/// An option of a select input
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelectChoice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// Where a field reads its initial value from
enum Source<'a> {
    Value(Option<&'a FieldValue>),
    Form(&'a RequestArgs),
}

/// A form field with its current raw value and errors
#[derive(Debug, Clone, Serialize)]
pub struct BoundField {
    /// Full, prefixed input name
    pub name: String,
    pub label: String,
    pub help_text: Option<String>,
    pub required: bool,
    pub widget: &'static str,
    pub value: String,
    pub checked: bool,
    pub choices: Vec<SelectChoice>,
    pub errors: Vec<String>,
    /// Fields of a subform
    pub fields: Vec<BoundField>,
    /// Entries of a list
    pub entries: Vec<BoundField>,
    /// Column headers of a tabular list
    pub headers: Vec<String>,
    /// Entry template of a tabular list, named `{name}-{{ row_count }}`
    pub empty_row: Option<Box<BoundField>>,
    #[serde(skip)]
    field_def: FormField,
}

impl BoundField {
    fn bind(field_def: &FormField, name: String, source: &Source<'_>) -> Self {
        let mut field = BoundField {
            label: field_def.label.clone(),
            help_text: field_def.help_text.clone(),
            required: field_def.required,
            widget: field_def.kind.widget(),
            value: String::new(),
            checked: false,
            choices: Vec::new(),
            errors: Vec::new(),
            fields: Vec::new(),
            entries: Vec::new(),
            headers: Vec::new(),
            empty_row: None,
            field_def: field_def.clone(),
            name,
        };

        match &field_def.kind {
            FieldKind::Subform(definition) => {
                field.fields = definition
                    .fields()
                    .iter()
                    .map(|child| {
                        let child_source = match source {
                            Source::Value(Some(FieldValue::Structured(map))) => {
                                Source::Value(map.get(&child.name))
                            }
                            Source::Value(_) => Source::Value(None),
                            Source::Form(args) => Source::Form(args),
                        };
                        BoundField::bind(child, format!("{}-{}", field.name, child.name), &child_source)
                    })
                    .collect();
            }
            FieldKind::List { entry, widget } => {
                field.entries = Self::bind_entries(entry, &field.name, source);
                if *widget == ListWidget::Stacked
                    && field.entries.is_empty()
                    && matches!(source, Source::Value(_))
                {
                    field.entries.push(BoundField::bind(
                        entry,
                        format!("{}-0", field.name),
                        &Source::Value(None),
                    ));
                }
                if *widget == ListWidget::Tabular {
                    if let FieldKind::Subform(definition) = &entry.kind {
                        field.headers = definition.fields().iter().map(|f| f.label.clone()).collect();
                    }
                    field.empty_row = Some(Box::new(BoundField::bind(
                        entry,
                        format!("{}-{{{{ row_count }}}}", field.name),
                        &Source::Value(None),
                    )));
                }
            }
            FieldKind::Boolean => {
                field.checked = match source {
                    Source::Value(Some(value)) => value.as_bool().unwrap_or(false),
                    Source::Value(None) => field_def.default.as_ref().and_then(FieldValue::as_bool).unwrap_or(false),
                    Source::Form(args) => args.flag(&field.name),
                };
                field.value = "y".to_string();
            }
            _ => {
                field.value = match source {
                    Source::Value(Some(value)) => raw_value(value),
                    Source::Value(None) => field_def.default.as_ref().map(raw_value).unwrap_or_default(),
                    Source::Form(args) => args.get(&field.name).unwrap_or_default().to_string(),
                };
                if let FieldKind::Select { choices } = &field_def.kind {
                    field.choices = select_choices(
                        choices.iter().map(|c| (c.clone(), c.clone())),
                        &field.value,
                        field_def.required,
                    );
                }
            }
        }
        field
    }

    fn bind_entries(entry: &FormField, name: &str, source: &Source<'_>) -> Vec<BoundField> {
        match source {
            Source::Value(Some(FieldValue::List(items))) => items
                .iter()
                .enumerate()
                .map(|(i, item)| BoundField::bind(entry, format!("{}-{}", name, i), &Source::Value(Some(item))))
                .collect(),
            Source::Value(Some(FieldValue::Null)) | Source::Value(None) => Vec::new(),
            Source::Value(Some(value)) => {
                vec![BoundField::bind(entry, format!("{}-0", name), &Source::Value(Some(value)))]
            }
            Source::Form(args) => {
                let prefix = format!("{}-", name);
                let indices: BTreeSet<usize> = args
                    .names_with_prefix(&prefix)
                    .filter_map(|full| {
                        let rest = &full[prefix.len()..];
                        rest.split('-').next()?.parse().ok()
                    })
                    .collect();
                indices
                    .into_iter()
                    .map(|i| BoundField::bind(entry, format!("{}{}", prefix, i), source))
                    .collect()
            }
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.field_def.kind.is_hidden()
    }

    /// The field's short name within its form
    pub fn short_name(&self) -> &str {
        &self.field_def.name
    }

    fn apply_key_choices(&mut self, choices: &KeyChoices) {
        if let FieldKind::KeySelect { kind } = &self.field_def.kind {
            let options = kind
                .as_ref()
                .and_then(|kind| choices.get(kind))
                .map(|options| options.as_slice())
                .unwrap_or_default();
            self.choices = select_choices(options.iter().cloned(), &self.value, self.required);
        }
        for child in self.fields.iter_mut().chain(self.entries.iter_mut()) {
            child.apply_key_choices(choices);
        }
        if let Some(row) = self.empty_row.as_mut() {
            row.apply_key_choices(choices);
        }
    }

    fn parse(&self) -> Result<FieldValue, String> {
        let raw = self.value.trim();
        let empty = raw.is_empty();
        match &self.field_def.kind {
            FieldKind::Boolean => Ok(FieldValue::Boolean(self.checked)),
            _ if empty => Ok(FieldValue::Null),
            FieldKind::Text { format } => {
                let value = FieldValue::String(self.value.clone());
                match format {
                    Some(format) if !format.validate(&value) => Err(format.message().to_string()),
                    _ => Ok(value),
                }
            }
            FieldKind::TextArea | FieldKind::Hidden => Ok(FieldValue::String(self.value.clone())),
            FieldKind::Integer => raw
                .parse()
                .map(FieldValue::Integer)
                .map_err(|_| "Not a valid integer value.".to_string()),
            FieldKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FieldValue::Float)
                .ok_or_else(|| "Not a valid float value.".to_string()),
            FieldKind::DateTime => parse_datetime(raw)
                .map(FieldValue::DateTime)
                .ok_or_else(|| "Not a valid datetime value.".to_string()),
            FieldKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(FieldValue::Date)
                .map_err(|_| "Not a valid date value.".to_string()),
            FieldKind::Select { choices } => {
                if choices.iter().any(|c| c == raw) {
                    Ok(FieldValue::String(raw.to_string()))
                } else {
                    Err("Not a valid choice.".to_string())
                }
            }
            FieldKind::KeySelect { kind } => Key::from_urlsafe(raw)
                .ok()
                .filter(|key| kind.as_deref().map_or(true, |kind| key.kind() == kind))
                .map(FieldValue::Key)
                .ok_or_else(|| "Not a valid choice.".to_string()),
            FieldKind::Subform(_) | FieldKind::List { .. } => Ok(FieldValue::Null),
        }
    }

    fn validate(&mut self) -> bool {
        self.errors.clear();
        match &self.field_def.kind {
            FieldKind::Subform(_) => self.fields.iter_mut().fold(true, |ok, f| f.validate() && ok),
            FieldKind::List { .. } => self.entries.iter_mut().fold(true, |ok, f| f.validate() && ok),
            _ => {
                match self.parse() {
                    Ok(value) if value.is_null() && self.required => {
                        self.errors.push(REQUIRED_MESSAGE.to_string())
                    }
                    Ok(_) => {}
                    Err(message) => self.errors.push(message),
                }
                self.errors.is_empty()
            }
        }
    }

    /// The field's value; invalid input reads as null
    pub fn data(&self) -> FieldValue {
        match &self.field_def.kind {
            FieldKind::Subform(_) => FieldValue::Structured(
                self.fields
                    .iter()
                    .map(|f| (f.short_name().to_string(), f.data()))
                    .collect(),
            ),
            FieldKind::List { .. } => FieldValue::List(
                self.entries
                    .iter()
                    .map(BoundField::data)
                    .filter(|v| !v.is_null())
                    .collect(),
            ),
            _ => self.parse().unwrap_or(FieldValue::Null),
        }
    }

    fn collect_errors(&self, errors: &mut IndexMap<String, Vec<String>>) {
        if !self.errors.is_empty() {
            errors.insert(self.name.clone(), self.errors.clone());
        }
        for child in self.fields.iter().chain(self.entries.iter()) {
            child.collect_errors(errors);
        }
    }
}

fn raw_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Key(key) => key.urlsafe(),
        FieldValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn select_choices<I>(options: I, current: &str, required: bool) -> Vec<SelectChoice>
where
    I: IntoIterator<Item = (String, String)>,
{
    let blank = (!required).then(|| SelectChoice {
        value: String::new(),
        label: String::new(),
        selected: current.is_empty(),
    });
    blank
        .into_iter()
        .chain(options.into_iter().map(|(value, label)| SelectChoice {
            selected: value == current,
            value,
            label,
        }))
        .collect()
}

/// A form definition bound to an entity or to submitted data
#[derive(Debug, Clone)]
pub struct BoundForm {
    definition: Arc<FormDefinition>,
    fields: Vec<BoundField>,
}

impl BoundForm {
    /// Bind to stored values; `None` binds the fields' defaults
    pub fn from_entity(definition: Arc<FormDefinition>, entity: Option<&Entity>) -> Self {
        let fields = definition
            .fields()
            .iter()
            .map(|field_def| {
                let value = entity.and_then(|e| e.get(&field_def.name));
                BoundField::bind(field_def, field_def.name.clone(), &Source::Value(value))
            })
            .collect();
        Self { definition, fields }
    }

    /// Bind to posted form data
    pub fn from_request(definition: Arc<FormDefinition>, form: &RequestArgs) -> Self {
        let source = Source::Form(form);
        let fields = definition
            .fields()
            .iter()
            .map(|field_def| BoundField::bind(field_def, field_def.name.clone(), &source))
            .collect();
        Self { definition, fields }
    }

    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    pub fn fields(&self) -> &[BoundField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&BoundField> {
        self.fields.iter().find(|f| f.short_name() == name)
    }

    pub fn apply_key_choices(&mut self, choices: &KeyChoices) {
        for field in &mut self.fields {
            field.apply_key_choices(choices);
        }
    }

    /// Validate every field, recording messages on the fields
    pub fn validate(&mut self) -> bool {
        self.fields.iter_mut().fold(true, |ok, f| f.validate() && ok)
    }

    /// Error messages by full input name
    pub fn errors(&self) -> IndexMap<String, Vec<String>> {
        let mut errors = IndexMap::new();
        for field in &self.fields {
            field.collect_errors(&mut errors);
        }
        errors
    }

    pub fn data(&self) -> IndexMap<String, FieldValue> {
        self.fields
            .iter()
            .map(|f| (f.short_name().to_string(), f.data()))
            .collect()
    }

    /// Copy the form's values onto an entity
    pub fn populate(&self, entity: &mut Entity) {
        for (name, value) in self.data() {
            entity.set(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{PropertyDef, PropertyType};
    use crate::forms::{FormOptions, KibbleModelConverter, ModelConverter};
    use crate::storage::InMemoryDatastore;

    fn author_form() -> Arc<FormDefinition> {
        let address = Arc::new(
            ModelSchema::new("Address")
                .property(PropertyDef::new("street", PropertyType::String))
                .property(PropertyDef::new("city", PropertyType::String).required()),
        );
        let schema = ModelSchema::new("Author")
            .property(PropertyDef::new("name", PropertyType::String).required())
            .property(PropertyDef::new("age", PropertyType::Integer))
            .property(PropertyDef::new("active", PropertyType::Boolean))
            .property(PropertyDef::new("tags", PropertyType::String).repeated())
            .property(PropertyDef::new("addresses", PropertyType::Structured(address)).repeated())
            .property(PropertyDef::new("publisher", PropertyType::Key { kind: Some("Publisher".to_string()) }));
        Arc::new(KibbleModelConverter.model_form(&schema, &FormOptions::default()))
    }

    #[test]
    fn test_bind_request_and_populate() {
        let form_data = RequestArgs::parse(
            "name=Herman&age=72&active=y&tags-0=sea&tags-2=whale&tags-1=\
             &addresses-0-street=Main&addresses-0-city=Boston",
        );
        let mut form = BoundForm::from_request(author_form(), &form_data);
        assert!(form.validate(), "{:?}", form.errors());

        let mut entity = Entity::new("Author");
        form.populate(&mut entity);
        assert_eq!(entity.get("name"), Some(&FieldValue::from("Herman")));
        assert_eq!(entity.get("age"), Some(&FieldValue::Integer(72)));
        assert_eq!(entity.get("active"), Some(&FieldValue::Boolean(true)));
        assert_eq!(
            entity.get("tags"),
            Some(&FieldValue::List(vec![FieldValue::from("sea"), FieldValue::from("whale")]))
        );
        let Some(FieldValue::List(addresses)) = entity.get("addresses") else {
            panic!("addresses not populated");
        };
        assert_eq!(addresses.len(), 1);
        assert_eq!(entity.get("publisher"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_validation_messages() {
        let form_data = RequestArgs::parse("age=old&addresses-0-street=Main&publisher=bogus");
        let mut form = BoundForm::from_request(author_form(), &form_data);
        assert!(!form.validate());
        let errors = form.errors();
        assert_eq!(errors["name"], vec![REQUIRED_MESSAGE.to_string()]);
        assert_eq!(errors["age"], vec!["Not a valid integer value.".to_string()]);
        assert_eq!(errors["addresses-0-city"], vec![REQUIRED_MESSAGE.to_string()]);
        assert_eq!(errors["publisher"], vec!["Not a valid choice.".to_string()]);
    }

    #[test]
    fn test_key_select_checks_kind() {
        let wrong = Key::new("Author", 1).urlsafe();
        let form_data = RequestArgs::new().with("name", "x").with("publisher", wrong);
        let mut form = BoundForm::from_request(author_form(), &form_data);
        assert!(!form.validate());

        let right = Key::new("Publisher", 1).urlsafe();
        let form_data = RequestArgs::new().with("name", "x").with("publisher", right);
        let mut form = BoundForm::from_request(author_form(), &form_data);
        assert!(form.validate());
    }

    #[test]
    fn test_bind_entity_values() {
        let entity = Entity::new("Author")
            .with("name", "Herman")
            .with("tags", FieldValue::List(vec![FieldValue::from("sea")]));
        let form = BoundForm::from_entity(author_form(), Some(&entity));
        assert_eq!(form.field("name").unwrap().value, "Herman");
        let tags = form.field("tags").unwrap();
        assert_eq!(tags.entries.len(), 1);
        assert_eq!(tags.entries[0].name, "tags-0");
        assert_eq!(tags.entries[0].value, "sea");
    }

    #[test]
    fn test_tabular_empty_row() {
        let form = BoundForm::from_entity(author_form(), None);
        let addresses = form.field("addresses").unwrap();
        assert!(addresses.entries.is_empty());
        assert_eq!(addresses.headers, vec!["Street", "City"]);
        let row = addresses.empty_row.as_ref().unwrap();
        assert_eq!(row.name, "addresses-{{ row_count }}");
        assert_eq!(row.fields[1].name, "addresses-{{ row_count }}-city");
    }

    #[tokio::test]
    async fn test_preload_key_choices() {
        let store = InMemoryDatastore::new();
        store.put(Entity::new("Publisher").with_id(1).with("name", "Harper")).await.unwrap();
        let publisher = Arc::new(
            ModelSchema::new("Publisher")
                .property(PropertyDef::new("name", PropertyType::String))
                .title_property("name"),
        );
        let schemas: IndexMap<String, Arc<ModelSchema>> =
            [("Publisher".to_string(), publisher)].into_iter().collect();

        let definition = author_form();
        let choices = preload_key_choices(&definition, Arc::new(store), &schemas).await;
        assert_eq!(choices["Publisher"].len(), 1);
        assert_eq!(choices["Publisher"][0].1, "Harper");

        let mut form = BoundForm::from_entity(definition, None);
        form.apply_key_choices(&choices);
        let publisher = form.field("publisher").unwrap();
        assert_eq!(publisher.choices.len(), 2);
        assert!(publisher.choices[0].selected);
    }
}
