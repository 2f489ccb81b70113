//! URL-driven query filters
//!
//! A filter reads one query-string argument named after its field, coerces
//! it and narrows the list query. Arguments that are missing or do not
//! coerce leave the query untouched.
//!
//! Every filter resolves its property path against the model schema when it
//! is constructed, so a typo in a field name fails at startup rather than
//! on the first request.

use crate::core::datastore::Datastore;
use crate::core::error::{ConfigError, StorageError};
use crate::core::field::{FieldValue, ValueType};
use crate::core::labels::{LabelService, title_case};
use crate::core::model::{CLASS_PROPERTY, ModelSchema, PropertyPath};
use crate::core::query::{FetchOptions, Operator, Query};
use crate::core::request::{RequestArgs, RequestState};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One selectable value of a filter
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChoice {
    pub value: FieldValue,
    pub label: String,
}

impl FilterChoice {
    pub fn new(value: impl Into<FieldValue>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Template view model of a rendered choice
#[derive(Debug, Clone, Serialize)]
pub struct ChoiceView {
    pub label: String,
    pub url: String,
    pub active: bool,
}

/// Template view model of a filter: "All" first, then each choice
#[derive(Debug, Clone, Serialize)]
pub struct FilterView {
    pub field: String,
    pub title: String,
    pub choices: Vec<ChoiceView>,
}

#[async_trait]
pub trait QueryFilter: Send + Sync {
    /// Name of the query-string argument, also the property path
    fn field(&self) -> &str;

    fn title(&self) -> &str;

    /// URL-safe form of a native value; `None` when the value is not valid
    fn value_to_url(&self, value: &FieldValue) -> Option<String>;

    /// Native form of a URL value; `None` when it is not valid
    fn url_to_value(&self, url_value: &str) -> Option<FieldValue>;

    /// Narrow `query` according to the request's argument
    fn filter(&self, query: Query, request: &RequestState) -> Query;

    /// Values offered to the user
    async fn choices(&self, store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError>;

    /// Whether [`choices`](Self::choices) hits the datastore
    fn needs_preload(&self) -> bool {
        false
    }

    /// The coerced value from the request, or `default`
    fn get(&self, args: &RequestArgs, default: Option<FieldValue>) -> Option<FieldValue> {
        args.get(self.field())
            .and_then(|raw| self.url_to_value(raw))
            .or(default)
    }

    /// The current URL with this filter set to `value`, or cleared for `None`
    fn url_for_value(&self, request: &RequestState, value: Option<&FieldValue>) -> String {
        let args = request.args.clone().without(self.field());
        let args = match value.and_then(|v| self.value_to_url(v)) {
            Some(url_value) => args.with(self.field(), url_value),
            None => args,
        };
        request.url_with(&args)
    }

    /// Build the template view model from loaded choices
    fn render(&self, request: &RequestState, choices: &[FilterChoice]) -> FilterView {
        let current = self
            .get(&request.args, None)
            .and_then(|v| self.value_to_url(&v));

        let mut views = vec![ChoiceView {
            label: "All".to_string(),
            url: self.url_for_value(request, None),
            active: current.is_none(),
        }];
        views.extend(choices.iter().map(|choice| {
            let url_value = self.value_to_url(&choice.value);
            ChoiceView {
                label: choice.label.clone(),
                url: self.url_for_value(request, Some(&choice.value)),
                active: url_value.is_some() && url_value == current,
            }
        }));

        FilterView {
            field: self.field().to_string(),
            title: self.title().to_string(),
            choices: views,
        }
    }
}

/// Field name, title and resolved path shared by the property filters
#[derive(Debug, Clone)]
struct FilterTarget {
    field: String,
    title: String,
    path: PropertyPath,
}

impl FilterTarget {
    fn resolve(schema: &ModelSchema, field: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            field: field.to_string(),
            title: title_case(field),
            path: schema.resolve(field)?,
        })
    }
}

// =============================================================================
// Equality
// =============================================================================

/// `field == value` with the value coerced from the URL
#[derive(Debug, Clone)]
pub struct EqualityFilter {
    target: FilterTarget,
    value_type: ValueType,
}

impl EqualityFilter {
    pub fn new(
        schema: &ModelSchema,
        field: &str,
        value_type: ValueType,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            target: FilterTarget::resolve(schema, field)?,
            value_type,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.target.title = title.into();
        self
    }
}

#[async_trait]
impl QueryFilter for EqualityFilter {
    fn field(&self) -> &str {
        &self.target.field
    }

    fn title(&self) -> &str {
        &self.target.title
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        self.value_type.to_url(value)
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        self.value_type.parse(url_value)
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        match self.get(&request.args, None) {
            Some(value) => query.filter(self.target.path.clone(), Operator::Eq, value),
            None => query,
        }
    }

    async fn choices(&self, _store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Choices
// =============================================================================

/// Equality restricted to an enumerated set of (value, label) pairs
#[derive(Debug, Clone)]
pub struct ChoicesFilter {
    inner: EqualityFilter,
    choices: Vec<FilterChoice>,
}

impl ChoicesFilter {
    pub fn new(
        schema: &ModelSchema,
        field: &str,
        value_type: ValueType,
        choices: Vec<FilterChoice>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: EqualityFilter::new(schema, field, value_type)?,
            choices,
        })
    }

    /// String choices taken from the property's declared choices
    pub fn from_property(schema: &ModelSchema, field: &str) -> Result<Self, ConfigError> {
        let declared = schema
            .get_property(field)
            .and_then(|p| p.choices.clone())
            .unwrap_or_default();
        let choices = declared
            .into_iter()
            .map(|c| FilterChoice::new(c.clone(), c))
            .collect();
        Self::new(schema, field, ValueType::Text, choices)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.inner = self.inner.with_title(title);
        self
    }
}

#[async_trait]
impl QueryFilter for ChoicesFilter {
    fn field(&self) -> &str {
        self.inner.field()
    }

    fn title(&self) -> &str {
        self.inner.title()
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        self.inner.value_to_url(value)
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        self.inner
            .url_to_value(url_value)
            .filter(|value| self.choices.iter().any(|c| &c.value == value))
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        match self.get(&request.args, None) {
            Some(value) => query.filter(self.inner.target.path.clone(), Operator::Eq, value),
            None => query,
        }
    }

    async fn choices(&self, _store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        Ok(self.choices.clone())
    }
}

// =============================================================================
// Bool
// =============================================================================

/// `'t'` → `field == true`, `'f'` → `field == false`
#[derive(Debug, Clone)]
pub struct BoolFilter {
    target: FilterTarget,
}

impl BoolFilter {
    pub fn new(schema: &ModelSchema, field: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            target: FilterTarget::resolve(schema, field)?,
        })
    }
}

#[async_trait]
impl QueryFilter for BoolFilter {
    fn field(&self) -> &str {
        &self.target.field
    }

    fn title(&self) -> &str {
        &self.target.title
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        match value {
            FieldValue::Boolean(true) => Some("t".to_string()),
            FieldValue::Boolean(false) => Some("f".to_string()),
            _ => None,
        }
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        match url_value {
            "t" => Some(FieldValue::Boolean(true)),
            "f" => Some(FieldValue::Boolean(false)),
            _ => None,
        }
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        match self.get(&request.args, None) {
            Some(value) => query.filter(self.target.path.clone(), Operator::Eq, value),
            None => query,
        }
    }

    async fn choices(&self, _store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        Ok(vec![
            FilterChoice::new(true, "True"),
            FilterChoice::new(false, "False"),
        ])
    }
}

// =============================================================================
// Key
// =============================================================================

/// Filter on a key property; choices are the entities of the referenced kind
#[derive(Debug, Clone)]
pub struct KeyFilter {
    target: FilterTarget,
    referenced: Arc<ModelSchema>,
    query: Query,
}

impl KeyFilter {
    pub fn new(
        schema: &ModelSchema,
        field: &str,
        referenced: Arc<ModelSchema>,
    ) -> Result<Self, ConfigError> {
        let query = Query::new(referenced.kind());
        Ok(Self {
            target: FilterTarget::resolve(schema, field)?,
            referenced,
            query,
        })
    }

    /// Offer the results of `query` instead of every entity of the kind
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.target.title = title.into();
        self
    }
}

#[async_trait]
impl QueryFilter for KeyFilter {
    fn field(&self) -> &str {
        &self.target.field
    }

    fn title(&self) -> &str {
        &self.target.title
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        ValueType::Key.to_url(value)
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        ValueType::Key.parse(url_value)
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        match self.get(&request.args, None) {
            Some(value) => query.filter(self.target.path.clone(), Operator::Eq, value),
            None => query,
        }
    }

    fn needs_preload(&self) -> bool {
        true
    }

    async fn choices(&self, store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        let rows = store.fetch(&self.query, FetchOptions::default()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = row.key()?;
                Some(FilterChoice::new(key, self.referenced.label_for(row)))
            })
            .collect())
    }
}

// =============================================================================
// Date buckets
// =============================================================================

/// A relative time range offered by [`DateTimeFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    None,
    PastMonth,
    PastWeek,
    Today,
    NextWeek,
    NextMonth,
}

/// Lower and upper bound of a bucket, each with its comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub lower: (Operator, DateTime<Utc>),
    pub upper: (Operator, DateTime<Utc>),
}

impl DateBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateBucket::None => "none",
            DateBucket::PastMonth => "past_month",
            DateBucket::PastWeek => "past_week",
            DateBucket::Today => "today",
            DateBucket::NextWeek => "next_week",
            DateBucket::NextMonth => "next_month",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DateBucket::None => "None",
            DateBucket::PastMonth => "Past month",
            DateBucket::PastWeek => "Past 7 days",
            DateBucket::Today => "Today",
            DateBucket::NextWeek => "Next 7 days",
            DateBucket::NextMonth => "Next month",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(DateBucket::None),
            "past_month" => Some(DateBucket::PastMonth),
            "past_week" => Some(DateBucket::PastWeek),
            "today" => Some(DateBucket::Today),
            "next_week" => Some(DateBucket::NextWeek),
            "next_month" => Some(DateBucket::NextMonth),
            _ => None,
        }
    }

    /// Bounds of the bucket relative to `now`; `None` for the null bucket
    pub fn range(&self, now: DateTime<Utc>) -> Option<DateRange> {
        let window = |lower, upper| DateRange {
            lower: (Operator::Gt, lower),
            upper: (Operator::Lt, upper),
        };
        match self {
            DateBucket::None => None,
            DateBucket::PastMonth => Some(window(now - Duration::days(28), now)),
            DateBucket::PastWeek => Some(window(now - Duration::days(7), now)),
            DateBucket::Today => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
                Some(DateRange {
                    lower: (Operator::Ge, midnight),
                    upper: (Operator::Lt, midnight + Duration::days(1)),
                })
            }
            DateBucket::NextWeek => Some(window(now, now + Duration::days(7))),
            DateBucket::NextMonth => Some(window(now, now + Duration::days(28))),
        }
    }
}

/// Filter a datetime property into buckets relative to the request clock
#[derive(Debug, Clone)]
pub struct DateTimeFilter {
    target: FilterTarget,
    none: bool,
    past: bool,
    present: bool,
    future: bool,
}

impl DateTimeFilter {
    pub fn new(schema: &ModelSchema, field: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            target: FilterTarget::resolve(schema, field)?,
            none: false,
            past: true,
            present: true,
            future: true,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.target.title = title.into();
        self
    }

    /// Offer a bucket for entities with no value
    pub fn none(mut self, enabled: bool) -> Self {
        self.none = enabled;
        self
    }

    pub fn past(mut self, enabled: bool) -> Self {
        self.past = enabled;
        self
    }

    pub fn present(mut self, enabled: bool) -> Self {
        self.present = enabled;
        self
    }

    pub fn future(mut self, enabled: bool) -> Self {
        self.future = enabled;
        self
    }

    /// Enabled buckets in display order
    pub fn buckets(&self) -> Vec<DateBucket> {
        let mut buckets = Vec::new();
        if self.none {
            buckets.push(DateBucket::None);
        }
        if self.past {
            buckets.extend([DateBucket::PastMonth, DateBucket::PastWeek]);
        }
        if self.present {
            buckets.push(DateBucket::Today);
        }
        if self.future {
            buckets.extend([DateBucket::NextWeek, DateBucket::NextMonth]);
        }
        buckets
    }
}

#[async_trait]
impl QueryFilter for DateTimeFilter {
    fn field(&self) -> &str {
        &self.target.field
    }

    fn title(&self) -> &str {
        &self.target.title
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        let bucket = DateBucket::parse(value.as_string()?)?;
        self.buckets()
            .contains(&bucket)
            .then(|| bucket.as_str().to_string())
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        let bucket = DateBucket::parse(url_value)?;
        self.buckets()
            .contains(&bucket)
            .then(|| FieldValue::from(bucket.as_str()))
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        let Some(bucket) = self
            .get(&request.args, None)
            .and_then(|v| v.as_string().and_then(DateBucket::parse))
        else {
            return query;
        };
        let path = self.target.path.clone();

        match bucket.range(request.now) {
            None => query.filter(path, Operator::Eq, FieldValue::Null),
            Some(range) => query
                .filter(path.clone(), range.lower.0, FieldValue::DateTime(range.lower.1))
                .filter(path, range.upper.0, FieldValue::DateTime(range.upper.1)),
        }
    }

    async fn choices(&self, _store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        Ok(self
            .buckets()
            .into_iter()
            .map(|b| FilterChoice::new(b.as_str(), b.label()))
            .collect())
    }
}

// =============================================================================
// Type tags
// =============================================================================

/// Filter polymorphic entities by the class recorded in their class chain
#[derive(Debug, Clone)]
pub struct TypeTagFilter {
    path: PropertyPath,
    title: String,
    tags: Vec<FilterChoice>,
}

impl TypeTagFilter {
    /// Filter over an explicit list of (tag, label) pairs
    pub fn new<I, T, L>(tags: I) -> Self
    where
        I: IntoIterator<Item = (T, L)>,
        T: Into<String>,
        L: Into<String>,
    {
        Self {
            path: PropertyPath::generic(CLASS_PROPERTY),
            title: "Class".to_string(),
            tags: tags
                .into_iter()
                .map(|(tag, label)| FilterChoice::new(FieldValue::String(tag.into()), label))
                .collect(),
        }
    }

    /// Tags of the strict descendants of `base` among `subtypes`, by label
    pub fn for_subtypes(base: &ModelSchema, subtypes: &[ModelSchema], labels: &LabelService) -> Self {
        let base_key = base.class_key();
        let mut tags: Vec<(String, String)> = subtypes
            .iter()
            .filter(|s| s.class_key().starts_with(base_key) && s.class_key() != base_key)
            .map(|s| {
                let tag = s.class_name().to_string();
                let label = labels.label_for_kind(&tag);
                (tag, label)
            })
            .collect();
        tags.sort_by(|a, b| a.1.cmp(&b.1));
        tags.dedup();
        Self::new(tags)
    }

    pub fn tags(&self) -> &[FilterChoice] {
        &self.tags
    }
}

#[async_trait]
impl QueryFilter for TypeTagFilter {
    fn field(&self) -> &str {
        CLASS_PROPERTY
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn value_to_url(&self, value: &FieldValue) -> Option<String> {
        value.as_string().map(str::to_string)
    }

    fn url_to_value(&self, url_value: &str) -> Option<FieldValue> {
        let value = FieldValue::from(url_value);
        self.tags.iter().any(|t| t.value == value).then_some(value)
    }

    fn filter(&self, query: Query, request: &RequestState) -> Query {
        match self.get(&request.args, None) {
            Some(value) => query.filter(self.path.clone(), Operator::Eq, value),
            None => query,
        }
    }

    async fn choices(&self, _store: &dyn Datastore) -> Result<Vec<FilterChoice>, StorageError> {
        Ok(self.tags.clone())
    }
}
