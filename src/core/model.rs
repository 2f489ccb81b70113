//! Model schema and entities
//!
//! A [`ModelSchema`] declares the properties of one datastore kind. Views,
//! filters and forms are all configured against a schema, and every dotted
//! property path they use is resolved once into a [`PropertyPath`] when the
//! view is built, so request handling never walks attribute names.

use crate::core::error::ConfigError;
use crate::core::field::{FieldFormat, FieldValue};
use crate::core::key::{IdValue, Key};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// Name of the property holding the class chain of polymorphic entities
pub const CLASS_PROPERTY: &str = "class";

/// The declared type of a property
#[derive(Debug, Clone)]
pub enum PropertyType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    /// Reference to another entity, optionally restricted to one kind
    Key { kind: Option<String> },
    /// Nested model stored inline
    Structured(Arc<ModelSchema>),
    /// Untyped property, only reachable through explicit paths
    Generic,
}

impl PropertyType {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Text => "text",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::DateTime => "datetime",
            PropertyType::Date => "date",
            PropertyType::Key { .. } => "key",
            PropertyType::Structured(_) => "structured",
            PropertyType::Generic => "generic",
        }
    }
}

/// A property declaration
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub property_type: PropertyType,
    pub repeated: bool,
    pub required: bool,
    pub choices: Option<Vec<String>>,
    pub default: Option<FieldValue>,
    pub verbose_name: Option<String>,
    pub format: Option<FieldFormat>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            repeated: false,
            required: false,
            choices: None,
            default: None,
            verbose_name: None,
            format: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = Some(name.into());
        self
    }

    pub fn format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Human label, e.g. `published_on` → `Published On`
    pub fn label(&self) -> String {
        self.verbose_name
            .clone()
            .unwrap_or_else(|| crate::core::labels::title_case(&self.name))
    }
}

/// The schema of one datastore kind
#[derive(Debug, Clone)]
pub struct ModelSchema {
    kind: String,
    class_key: Vec<String>,
    properties: Vec<PropertyDef>,
    title_property: Option<String>,
}

impl ModelSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            class_key: Vec::new(),
            properties: Vec::new(),
            title_property: None,
        }
    }

    /// Root of a polymorphic hierarchy; entities record their class chain
    pub fn polymodel(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            class_key: vec![kind.clone()],
            ..Self::new(kind)
        }
    }

    /// Derive a subclass sharing this schema's kind and properties
    pub fn subtype(&self, class_name: impl Into<String>) -> Self {
        let mut class_key = if self.class_key.is_empty() {
            vec![self.kind.clone()]
        } else {
            self.class_key.clone()
        };
        class_key.push(class_name.into());
        Self {
            kind: self.kind.clone(),
            class_key,
            properties: self.properties.clone(),
            title_property: self.title_property.clone(),
        }
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.retain(|p| p.name != property.name);
        self.properties.push(property);
        self
    }

    pub fn title_property(mut self, name: impl Into<String>) -> Self {
        self.title_property = Some(name.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Class chain from the hierarchy root, empty for plain models
    pub fn class_key(&self) -> &[String] {
        &self.class_key
    }

    /// Most specific class name; the kind for plain models
    pub fn class_name(&self) -> &str {
        self.class_key.last().unwrap_or(&self.kind)
    }

    pub fn is_polymorphic(&self) -> bool {
        !self.class_key.is_empty()
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Resolve a dotted property path into a typed accessor
    pub fn resolve(&self, path: &str) -> Result<PropertyPath, ConfigError> {
        if path == CLASS_PROPERTY && self.is_polymorphic() {
            return Ok(PropertyPath::generic(CLASS_PROPERTY));
        }

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mut schema = self;
        let mut repeated = false;
        let mut leaf: Option<&PropertyDef> = None;

        for (i, segment) in segments.iter().enumerate() {
            let prop = schema
                .get_property(segment)
                .ok_or_else(|| ConfigError::UnknownProperty {
                    kind: self.kind.clone(),
                    path: path.to_string(),
                })?;
            repeated |= prop.repeated;
            leaf = Some(prop);

            if i + 1 < segments.len() {
                match &prop.property_type {
                    PropertyType::Structured(inner) => schema = inner,
                    _ => {
                        return Err(ConfigError::NotStructured {
                            kind: self.kind.clone(),
                            path: path.to_string(),
                        });
                    }
                }
            }
        }

        let leaf = leaf.ok_or_else(|| ConfigError::UnknownProperty {
            kind: self.kind.clone(),
            path: path.to_string(),
        })?;

        Ok(PropertyPath {
            segments,
            property_type: leaf.property_type.clone(),
            repeated,
        })
    }

    /// A fresh, unsaved entity of this model
    pub fn new_entity(&self, parent: Option<Key>) -> Entity {
        let mut entity = Entity::new(self.kind.clone());
        entity.parent = parent;
        if self.is_polymorphic() {
            entity.set(
                CLASS_PROPERTY,
                FieldValue::List(
                    self.class_key
                        .iter()
                        .map(|c| FieldValue::String(c.clone()))
                        .collect(),
                ),
            );
        }
        for prop in &self.properties {
            if let Some(default) = &prop.default {
                entity.set(prop.name.clone(), default.clone());
            }
        }
        entity
    }

    /// Display string for an entity of this model
    pub fn label_for(&self, entity: &Entity) -> String {
        if let Some(title) = self
            .title_property
            .as_deref()
            .and_then(|name| entity.get(name))
            .filter(|value| !value.is_null())
        {
            return title.to_string();
        }
        match &entity.id {
            Some(id) => format!("{} {}", self.class_name(), id),
            None => format!("New {}", self.class_name()),
        }
    }
}

/// A resolved property path: the typed accessor filters, sorts and list
/// columns hold instead of attribute names
#[derive(Debug, Clone)]
pub struct PropertyPath {
    segments: Vec<String>,
    property_type: PropertyType,
    repeated: bool,
}

impl PropertyPath {
    /// Path to a property that is not declared on the schema
    pub fn generic(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
            property_type: PropertyType::Generic,
            repeated: true,
        }
    }

    /// Dotted name, as used in URLs and datastore predicates
    pub fn name(&self) -> String {
        self.segments.join(".")
    }

    pub fn property_type(&self) -> &PropertyType {
        &self.property_type
    }

    /// Whether any segment along the path is repeated
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    /// All values reachable through the path, lists flattened
    pub fn values<'a>(&self, entity: &'a Entity) -> Vec<&'a FieldValue> {
        let Some(first) = entity.properties.get(&self.segments[0]) else {
            return Vec::new();
        };
        let mut current = flatten(first);

        for segment in &self.segments[1..] {
            current = current
                .into_iter()
                .filter_map(|value| match value {
                    FieldValue::Structured(map) => map.get(segment),
                    _ => None,
                })
                .flat_map(flatten)
                .collect();
        }
        current
    }

    /// The single value at the path, for non-repeated paths
    pub fn value<'a>(&self, entity: &'a Entity) -> Option<&'a FieldValue> {
        self.values(entity).into_iter().next()
    }
}

fn flatten(value: &FieldValue) -> Vec<&FieldValue> {
    match value {
        FieldValue::List(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// A datastore entity: a document with a key
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    kind: String,
    parent: Option<Key>,
    id: Option<IdValue>,
    properties: IndexMap<String, FieldValue>,
}

impl Entity {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parent: None,
            id: None,
            properties: IndexMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_id(mut self, id: impl Into<IdValue>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &IndexMap<String, FieldValue> {
        &self.properties
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_ref()
    }

    pub fn id(&self) -> Option<&IdValue> {
        self.id.as_ref()
    }

    pub(crate) fn assign_id(&mut self, id: IdValue) {
        self.id = Some(id);
    }

    /// The complete key, once the entity has an id
    pub fn key(&self) -> Option<Key> {
        let id = self.id.clone()?;
        Some(match &self.parent {
            Some(parent) => parent.child(self.kind.clone(), id),
            None => Key::new(self.kind.clone(), id),
        })
    }

    /// Class chain of a polymorphic entity, empty otherwise
    pub fn class_key(&self) -> Vec<&str> {
        match self.properties.get(CLASS_PROPERTY) {
            Some(FieldValue::List(items)) => items.iter().filter_map(|v| v.as_string()).collect(),
            Some(FieldValue::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Arc<ModelSchema> {
        Arc::new(
            ModelSchema::new("Address")
                .property(PropertyDef::new("city", PropertyType::String))
                .property(PropertyDef::new("street", PropertyType::String)),
        )
    }

    fn author() -> ModelSchema {
        ModelSchema::new("Author")
            .property(PropertyDef::new("name", PropertyType::String).required())
            .property(PropertyDef::new("active", PropertyType::Boolean).default_value(true))
            .property(
                PropertyDef::new("addresses", PropertyType::Structured(address())).repeated(),
            )
            .title_property("name")
    }

    fn structured(pairs: &[(&str, &str)]) -> FieldValue {
        FieldValue::Structured(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn test_resolve_simple_path() {
        let path = author().resolve("name").unwrap();
        assert_eq!(path.name(), "name");
        assert!(matches!(path.property_type(), PropertyType::String));
        assert!(!path.is_repeated());
    }

    #[test]
    fn test_resolve_nested_path() {
        let path = author().resolve("addresses.city").unwrap();
        assert_eq!(path.name(), "addresses.city");
        assert!(path.is_repeated());
    }

    #[test]
    fn test_resolve_unknown_property() {
        let err = author().resolve("nickname").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProperty { .. }));

        let err = author().resolve("name.first").unwrap_err();
        assert!(matches!(err, ConfigError::NotStructured { .. }));

        let err = author().resolve("addresses.zip").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProperty { .. }));
    }

    #[test]
    fn test_class_path_only_on_polymodels() {
        assert!(author().resolve(CLASS_PROPERTY).is_err());
        let animal = ModelSchema::polymodel("Animal");
        assert!(animal.resolve(CLASS_PROPERTY).is_ok());
    }

    #[test]
    fn test_accessor_flattens_repeated_structures() {
        let schema = author();
        let entity = schema.new_entity(None).with("name", "Ann").with(
            "addresses",
            FieldValue::List(vec![
                structured(&[("city", "Oslo")]),
                structured(&[("city", "Bergen")]),
            ]),
        );
        let path = schema.resolve("addresses.city").unwrap();
        let values: Vec<String> = path.values(&entity).iter().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["Oslo", "Bergen"]);
        assert!(schema.resolve("name").unwrap().value(&entity).is_some());
    }

    #[test]
    fn test_new_entity_applies_defaults() {
        let entity = author().new_entity(Some(Key::new("Library", 1)));
        assert_eq!(entity.get("active"), Some(&FieldValue::Boolean(true)));
        assert_eq!(entity.parent(), Some(&Key::new("Library", 1)));
        assert!(entity.key().is_none());
    }

    #[test]
    fn test_key_includes_parent() {
        let entity = Entity::new("Book")
            .with_parent(Key::new("Author", 1))
            .with_id(7);
        assert_eq!(entity.key(), Some(Key::new("Author", 1).child("Book", 7)));
    }

    #[test]
    fn test_polymodel_subtypes() {
        let animal = ModelSchema::polymodel("Animal")
            .property(PropertyDef::new("name", PropertyType::String));
        let dog = animal
            .subtype("Dog")
            .property(PropertyDef::new("breed", PropertyType::String));

        assert_eq!(dog.kind(), "Animal");
        assert_eq!(dog.class_name(), "Dog");
        assert_eq!(dog.class_key(), &["Animal".to_string(), "Dog".to_string()]);
        assert_eq!(dog.properties().len(), 2);

        let entity = dog.new_entity(None);
        assert_eq!(entity.class_key(), vec!["Animal", "Dog"]);
    }

    #[test]
    fn test_label_for() {
        let schema = author();
        let named = schema.new_entity(None).with("name", "Ann").with_id(3);
        assert_eq!(schema.label_for(&named), "Ann");

        let unnamed = Entity::new("Author").with_id(3);
        assert_eq!(schema.label_for(&unnamed), "Author 3");
        assert_eq!(schema.label_for(&Entity::new("Author")), "New Author");
    }
}
