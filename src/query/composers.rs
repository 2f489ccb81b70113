//! Query composers
//!
//! A list view runs its composers in order. Each one takes the query built
//! so far, returns a narrowed or ordered query, contributes fetch options and
//! exposes a template variable.

use crate::core::datastore::Datastore;
use crate::core::error::StorageError;
use crate::core::model::PropertyPath;
use crate::core::query::{FetchOptions, Query};
use crate::core::request::RequestState;
use crate::query::filters::{FilterChoice, FilterView, QueryFilter};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Builds the URL of a given page of the current listing
pub type PageUrlFn = Arc<dyn Fn(usize) -> Option<String> + Send + Sync>;

/// Everything a composer may draw on when it is constructed
#[derive(Clone)]
pub struct ComposeInput {
    pub store: Arc<dyn Datastore>,
    pub request: Arc<RequestState>,
    pub filters: Vec<Arc<dyn QueryFilter>>,
    pub sortable: Vec<SortField>,
    pub page_size: usize,
    pub max_page_size: usize,
    pub page_url: PageUrlFn,
}

#[async_trait]
pub trait QueryComposer: Send + Sync {
    /// Template variable the composer's context is stored under
    fn context_var(&self) -> &'static str;

    /// The query with this composer applied
    fn get_query(&self) -> Query;

    /// Fetch options contributed by this composer
    fn get_query_params(&self) -> FetchOptions {
        FetchOptions::default()
    }

    /// Fetch options once anything they depend on has resolved
    async fn resolve_query_params(&self) -> Result<FetchOptions, StorageError> {
        Ok(self.get_query_params())
    }

    /// Template context
    async fn context(&self) -> Result<Value, StorageError>;
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Backend {
        message: format!("failed to serialize composer context: {}", e),
    })
}

// =============================================================================
// Filters
// =============================================================================

type ChoicesTask = JoinHandle<Result<Vec<FilterChoice>, StorageError>>;

/// Applies the view's filters and renders their choice lists
///
/// Choices that need the datastore are fetched on spawned tasks as soon as
/// the composer is built, so they load alongside the page itself.
pub struct FilterComposer {
    query: Query,
    request: Arc<RequestState>,
    store: Arc<dyn Datastore>,
    filters: Vec<Arc<dyn QueryFilter>>,
    preloads: Mutex<Vec<Option<ChoicesTask>>>,
}

impl FilterComposer {
    pub fn new(input: &ComposeInput, query: Query) -> Self {
        let query = input
            .filters
            .iter()
            .fold(query, |q, filter| filter.filter(q, &input.request));

        let preloads = input
            .filters
            .iter()
            .map(|filter| {
                filter.needs_preload().then(|| {
                    let filter = filter.clone();
                    let store = input.store.clone();
                    tokio::spawn(async move { filter.choices(store.as_ref()).await })
                })
            })
            .collect();

        Self {
            query,
            request: input.request.clone(),
            store: input.store.clone(),
            filters: input.filters.clone(),
            preloads: Mutex::new(preloads),
        }
    }

    fn take_preload(&self, index: usize) -> Option<ChoicesTask> {
        self.preloads
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.get_mut(index).and_then(Option::take))
    }
}

#[async_trait]
impl QueryComposer for FilterComposer {
    fn context_var(&self) -> &'static str {
        "filters"
    }

    fn get_query(&self) -> Query {
        self.query.clone()
    }

    async fn context(&self) -> Result<Value, StorageError> {
        let mut views: Vec<FilterView> = Vec::with_capacity(self.filters.len());

        for (index, filter) in self.filters.iter().enumerate() {
            let choices = match self.take_preload(index) {
                Some(task) => task.await.unwrap_or_else(|e| {
                    Err(StorageError::Backend {
                        message: e.to_string(),
                    })
                }),
                None => filter.choices(self.store.as_ref()).await,
            };
            let choices = choices.unwrap_or_else(|e| {
                tracing::debug!(field = filter.field(), error = %e, "filter choices unavailable");
                Vec::new()
            });
            views.push(filter.render(&self.request, &choices));
        }

        to_value(&views)
    }
}

// =============================================================================
// Sorting
// =============================================================================

/// A property the list may be ordered by
#[derive(Debug, Clone)]
pub struct SortField {
    pub name: String,
    pub title: String,
    pub path: PropertyPath,
}

#[derive(Debug, Serialize)]
struct SortView {
    name: String,
    title: String,
    url: String,
    active: bool,
    descending: bool,
}

/// Orders the query by `sort=<field>` or `sort=-<field>`
pub struct SortComposer {
    query: Query,
    request: Arc<RequestState>,
    sortable: Vec<SortField>,
    current: Option<(usize, bool)>,
}

impl SortComposer {
    pub const SORT_ARG: &'static str = "sort";

    pub fn new(input: &ComposeInput, query: Query) -> Self {
        let current = input.request.args.get(Self::SORT_ARG).and_then(|raw| {
            let (name, descending) = match raw.strip_prefix('-') {
                Some(name) => (name, true),
                None => (raw, false),
            };
            input
                .sortable
                .iter()
                .position(|f| f.name == name)
                .map(|i| (i, descending))
        });

        let query = match current {
            Some((index, descending)) => query.order(input.sortable[index].path.clone(), descending),
            None => query,
        };

        Self {
            query,
            request: input.request.clone(),
            sortable: input.sortable.clone(),
            current,
        }
    }

    /// Name and direction of the active ordering
    pub fn current(&self) -> Option<(&str, bool)> {
        self.current
            .map(|(index, descending)| (self.sortable[index].name.as_str(), descending))
    }

    fn url_for(&self, name: &str, descending: bool) -> String {
        let value = if descending {
            format!("-{}", name)
        } else {
            name.to_string()
        };
        let args = self
            .request
            .args
            .clone()
            .without("page")
            .without(Self::SORT_ARG)
            .with(Self::SORT_ARG, value);
        self.request.url_with(&args)
    }
}

#[async_trait]
impl QueryComposer for SortComposer {
    fn context_var(&self) -> &'static str {
        "sort"
    }

    fn get_query(&self) -> Query {
        self.query.clone()
    }

    async fn context(&self) -> Result<Value, StorageError> {
        let views: Vec<SortView> = self
            .sortable
            .iter()
            .map(|field| {
                let active = self.current().map(|(name, desc)| (name == field.name, desc));
                let (active, descending) = active.unwrap_or((false, false));
                SortView {
                    name: field.name.clone(),
                    title: field.title.clone(),
                    // Clicking the active column flips its direction
                    url: self.url_for(&field.name, active && !descending),
                    active,
                    descending: active && descending,
                }
            })
            .collect();
        to_value(&views)
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Page arithmetic once the total is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub pages: usize,
}

impl PageInfo {
    /// Pages past the last one fall back to page 1
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let per_page = per_page.max(1);
        let pages = total.div_ceil(per_page);
        let page = if page == 0 || page > pages.max(1) { 1 } else { page };
        Self {
            page,
            per_page,
            total,
            pages,
        }
    }

    /// Offset of the first row on this page
    pub fn offset(&self) -> usize {
        page_offset(self.per_page, self.page).unwrap_or(0)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn prev(&self) -> usize {
        self.page.saturating_sub(1)
    }

    pub fn next(&self) -> usize {
        self.page.saturating_add(1)
    }

    /// Abbreviated page list; `None` marks a gap
    ///
    /// Keeps the first `left_edge` and last `right_edge` pages, plus the
    /// window from `left_current` pages before the current page to
    /// `right_current - 1` pages after it.
    pub fn iter_page_numbers(
        &self,
        left_edge: usize,
        left_current: usize,
        right_current: usize,
        right_edge: usize,
    ) -> Vec<Option<usize>> {
        let mut output = Vec::new();
        let mut last = 0;

        for num in 1..=self.pages {
            let in_window = num.saturating_add(left_current).saturating_add(1) > self.page
                && num < self.page.saturating_add(right_current);
            if num <= left_edge || in_window || num.saturating_add(right_edge) > self.pages {
                if last + 1 != num {
                    output.push(None);
                }
                output.push(Some(num));
                last = num;
            }
        }
        output
    }

    /// [`iter_page_numbers`](Self::iter_page_numbers) with the usual window
    pub fn page_numbers(&self) -> Vec<Option<usize>> {
        self.iter_page_numbers(2, 2, 5, 2)
    }
}

fn page_offset(per_page: usize, page: usize) -> Option<usize> {
    per_page.checked_mul(page.checked_sub(1)?)
}

#[derive(Debug, Serialize)]
struct PageLink {
    number: Option<usize>,
    url: Option<String>,
    current: bool,
}

#[derive(Debug, Serialize)]
struct PaginatorView {
    #[serde(flatten)]
    info: PageInfo,
    has_next: bool,
    has_prev: bool,
    prev_url: Option<String>,
    next_url: Option<String>,
    page_numbers: Vec<PageLink>,
}

/// Slices the query into pages
///
/// The total count is spawned at construction and only awaited when the
/// page context is first built, so it runs alongside the page fetch.
pub struct Paginator {
    query: Query,
    per_page: usize,
    page_number: usize,
    page_url: PageUrlFn,
    count_task: Mutex<Option<JoinHandle<Result<usize, StorageError>>>>,
    total: OnceCell<Result<usize, StorageError>>,
}

impl Paginator {
    pub const PAGE_ARG: &'static str = "page";
    pub const PAGE_SIZE_ARG: &'static str = "page-size";

    pub fn new(input: &ComposeInput, query: Query) -> Self {
        let per_page = Self::per_page_for(&input.request, input.page_size, input.max_page_size);
        let page_number = Some(Self::page_number_for(&input.request))
            .filter(|page| page_offset(per_page, *page).is_some())
            .unwrap_or(1);

        let store = input.store.clone();
        let count_query = query.clone();
        let count_task = tokio::spawn(async move { store.count(&count_query).await });

        Self {
            query,
            per_page,
            page_number,
            page_url: input.page_url.clone(),
            count_task: Mutex::new(Some(count_task)),
            total: OnceCell::new(),
        }
    }

    /// Requested page size, clamped to `[1, max_page_size]`
    pub fn per_page_for(request: &RequestState, page_size: usize, max_page_size: usize) -> usize {
        let requested = request
            .args
            .get(Self::PAGE_SIZE_ARG)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(page_size);
        requested.clamp(1, max_page_size.max(1))
    }

    /// Page from the URL pattern, else the query string; 1 when unusable
    ///
    /// Pages past the end are only known once the count resolves, see
    /// [`PageInfo::new`].
    pub fn page_number_for(request: &RequestState) -> usize {
        request
            .view_args
            .page
            .or_else(|| {
                request
                    .args
                    .get(Self::PAGE_ARG)
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
            })
            .filter(|page| *page >= 1)
            .unwrap_or(1)
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn url_for_page(&self, number: usize) -> Option<String> {
        (self.page_url)(number)
    }

    pub async fn total_objects(&self) -> Result<usize, StorageError> {
        self.total
            .get_or_init(|| async {
                let task = self.count_task.lock().ok().and_then(|mut t| t.take());
                match task {
                    Some(task) => task.await.unwrap_or_else(|e| {
                        Err(StorageError::Backend {
                            message: e.to_string(),
                        })
                    }),
                    None => Err(StorageError::Backend {
                        message: "count task already consumed".to_string(),
                    }),
                }
            })
            .await
            .clone()
    }

    pub async fn info(&self) -> Result<PageInfo, StorageError> {
        let total = self.total_objects().await?;
        Ok(PageInfo::new(self.page_number, self.per_page, total))
    }
}

#[async_trait]
impl QueryComposer for Paginator {
    fn context_var(&self) -> &'static str {
        "paginator"
    }

    fn get_query(&self) -> Query {
        self.query.clone()
    }

    fn get_query_params(&self) -> FetchOptions {
        let offset = page_offset(self.per_page, self.page_number).unwrap_or(0);
        FetchOptions::page(self.per_page, offset)
    }

    async fn resolve_query_params(&self) -> Result<FetchOptions, StorageError> {
        // Page 1 is always in range, so the fetch need not wait on the count
        if self.page_number == 1 {
            return Ok(self.get_query_params());
        }
        let info = self.info().await?;
        Ok(FetchOptions::page(self.per_page, info.offset()))
    }

    async fn context(&self) -> Result<Value, StorageError> {
        let info = self.info().await?;
        let page_numbers = info
            .page_numbers()
            .into_iter()
            .map(|number| PageLink {
                number,
                url: number.and_then(|n| self.url_for_page(n)),
                current: number == Some(info.page),
            })
            .collect();

        to_value(&PaginatorView {
            info,
            has_next: info.has_next(),
            has_prev: info.has_prev(),
            prev_url: info.has_prev().then(|| self.url_for_page(info.prev())).flatten(),
            next_url: info.has_next().then(|| self.url_for_page(info.next())).flatten(),
            page_numbers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::{FieldValue, ValueType};
    use crate::core::model::{Entity, ModelSchema, PropertyDef, PropertyType};
    use crate::core::request::ViewArgs;
    use crate::query::filters::{BoolFilter, EqualityFilter};
    use crate::storage::InMemoryDatastore;

    fn book() -> ModelSchema {
        ModelSchema::new("Book")
            .property(PropertyDef::new("title", PropertyType::String))
            .property(PropertyDef::new("year", PropertyType::Integer))
            .property(PropertyDef::new("in_print", PropertyType::Boolean))
    }

    async fn store_with_books(n: i64) -> Arc<dyn Datastore> {
        let store = InMemoryDatastore::new();
        for i in 0..n {
            store
                .put(
                    Entity::new("Book")
                        .with("title", format!("Book {}", i))
                        .with("year", 1900 + i)
                        .with("in_print", i % 2 == 0),
                )
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn input(store: Arc<dyn Datastore>, request: RequestState) -> ComposeInput {
        let schema = book();
        ComposeInput {
            store,
            request: Arc::new(request),
            filters: vec![
                Arc::new(BoolFilter::new(&schema, "in_print").unwrap()),
                Arc::new(EqualityFilter::new(&schema, "year", ValueType::Integer).unwrap()),
            ],
            sortable: vec![SortField {
                name: "year".to_string(),
                title: "Year".to_string(),
                path: schema.resolve("year").unwrap(),
            }],
            page_size: 10,
            max_page_size: 25,
            page_url: Arc::new(|n| Some(format!("/admin/book/page-{}/", n))),
        }
    }

    #[test]
    fn test_page_window() {
        let info = PageInfo::new(10, 10, 200);
        assert_eq!(info.pages, 20);
        let expected = vec![
            Some(1),
            Some(2),
            None,
            Some(8),
            Some(9),
            Some(10),
            Some(11),
            Some(12),
            Some(13),
            Some(14),
            None,
            Some(19),
            Some(20),
        ];
        assert_eq!(info.iter_page_numbers(2, 2, 5, 2), expected);
    }

    #[test]
    fn test_page_window_without_gaps() {
        let info = PageInfo::new(1, 10, 45);
        assert_eq!(
            info.page_numbers(),
            vec![Some(1), Some(2), Some(3), Some(4), Some(5)]
        );
        assert!(PageInfo::new(1, 10, 0).page_numbers().is_empty());
    }

    #[test]
    fn test_pages_is_ceiling() {
        for (total, per_page, pages) in [(0, 5, 0), (1, 5, 1), (5, 5, 1), (6, 5, 2), (101, 20, 6)] {
            assert_eq!(PageInfo::new(1, per_page, total).pages, pages);
        }
    }

    #[test]
    fn test_navigation_flags() {
        let info = PageInfo::new(3, 10, 30);
        assert!(info.has_prev());
        assert!(!info.has_next());
        assert_eq!(info.prev(), 2);
        assert_eq!(info.next(), 4);
    }

    #[test]
    fn test_page_size_never_exceeds_maximum() {
        for (raw, expected) in [
            ("page-size=5", 5),
            ("page-size=500", 25),
            ("page-size=0", 1),
            ("page-size=abc", 10),
            ("", 10),
        ] {
            let request = RequestState::get("/admin/book/").with_query(raw);
            assert_eq!(Paginator::per_page_for(&request, 10, 25), expected, "{}", raw);
        }
    }

    #[test]
    fn test_page_number_fallbacks() {
        let cases = [("page=3", None, 3), ("page=abc", None, 1), ("page=0", None, 1), ("page=3", Some(4), 4), ("", None, 1)];
        for (raw, view_page, expected) in cases {
            let request = RequestState::get("/admin/book/")
                .with_query(raw)
                .with_view_args(ViewArgs {
                    page: view_page,
                    ..ViewArgs::default()
                });
            assert_eq!(Paginator::page_number_for(&request), expected);
        }
    }

    #[tokio::test]
    async fn test_paginator_slices_and_counts() {
        let store = store_with_books(23).await;
        let request = RequestState::get("/admin/book/").with_query("page=3");
        let paginator = Paginator::new(&input(store.clone(), request), Query::new("Book"));

        assert_eq!(paginator.get_query_params(), FetchOptions::page(10, 20));
        let rows = store
            .fetch(&paginator.get_query(), paginator.get_query_params())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);

        let info = paginator.info().await.unwrap();
        assert_eq!(info.total, 23);
        assert_eq!(info.pages, 3);

        let context = paginator.context().await.unwrap();
        assert_eq!(context["page"], 3);
        assert_eq!(context["has_next"], false);
        assert_eq!(context["prev_url"], "/admin/book/page-2/");
    }

    #[test]
    fn test_page_info_falls_back_past_last_page() {
        let info = PageInfo::new(99, 10, 23);
        assert_eq!(info.page, 1);
        assert_eq!(info.offset(), 0);
        assert_eq!(PageInfo::new(2, 10, 0).page, 1);
        assert_eq!(PageInfo::new(3, 10, 23).offset(), 20);

        let windowed = PageInfo {
            page: usize::MAX,
            per_page: 10,
            total: 30,
            pages: 3,
        };
        assert_eq!(windowed.page_numbers(), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(windowed.next(), usize::MAX);
    }

    #[tokio::test]
    async fn test_paginator_overflowing_page_is_first_page() {
        let store = store_with_books(3).await;
        let request = RequestState::get("/admin/book/").with_query("page=18446744073709551615");
        let paginator = Paginator::new(&input(store, request), Query::new("Book"));

        assert_eq!(paginator.page_number(), 1);
        assert_eq!(paginator.get_query_params(), FetchOptions::page(10, 0));
        assert_eq!(paginator.resolve_query_params().await.unwrap(), FetchOptions::page(10, 0));
    }

    #[tokio::test]
    async fn test_paginator_page_past_end_fetches_first_page() {
        let store = store_with_books(23).await;
        let request = RequestState::get("/admin/book/").with_query("page=7");
        let paginator = Paginator::new(&input(store.clone(), request), Query::new("Book"));

        let params = paginator.resolve_query_params().await.unwrap();
        assert_eq!(params, FetchOptions::page(10, 0));
        let rows = store.fetch(&paginator.get_query(), params).await.unwrap();
        assert_eq!(rows.len(), 10);

        let context = paginator.context().await.unwrap();
        assert_eq!(context["page"], 1);
        assert_eq!(context["has_prev"], false);
        assert_eq!(context["has_next"], true);
    }

    #[tokio::test]
    async fn test_filter_composer_applies_filters() {
        let store = store_with_books(6).await;
        let request = RequestState::get("/admin/book/").with_query("in_print=t&year=junk");
        let composer = FilterComposer::new(&input(store.clone(), request), Query::new("Book"));

        let query = composer.get_query();
        assert_eq!(query.predicates().len(), 1);
        assert_eq!(store.count(&query).await.unwrap(), 3);

        let context = composer.context().await.unwrap();
        assert_eq!(context[0]["title"], "In Print");
        assert_eq!(context[0]["choices"][1]["active"], true);
        assert_eq!(context[1]["choices"][0]["active"], true);
    }

    #[tokio::test]
    async fn test_sort_composer() {
        let store = store_with_books(3).await;
        let request = RequestState::get("/admin/book/").with_query("sort=-year&page=2");
        let composer = SortComposer::new(&input(store.clone(), request), Query::new("Book"));
        assert_eq!(composer.current(), Some(("year", true)));

        let rows = store
            .fetch(&composer.get_query(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(rows[0].get("year"), Some(&FieldValue::Integer(1902)));

        let context = composer.context().await.unwrap();
        assert_eq!(context[0]["active"], true);
        assert_eq!(context[0]["url"], "/admin/book/?sort=year");

        let unknown = RequestState::get("/admin/book/").with_query("sort=title");
        let composer = SortComposer::new(&input(store, unknown), Query::new("Book"));
        assert!(composer.get_query().orders().is_empty());
    }
}
