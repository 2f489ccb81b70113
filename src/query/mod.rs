//! Request-driven query building: filters and composers

pub mod composers;
pub mod filters;

pub use composers::{
    ComposeInput, FilterComposer, PageInfo, PageUrlFn, Paginator, QueryComposer, SortComposer,
    SortField,
};
pub use filters::{
    BoolFilter, ChoiceView, ChoicesFilter, DateBucket, DateRange, DateTimeFilter, EqualityFilter,
    FilterChoice, FilterView, KeyFilter, QueryFilter, TypeTagFilter,
};
