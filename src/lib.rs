//! # Kibble
//!
//! An admin interface generator for document datastores. Each model gets a
//! set of views (list, create, edit, delete and custom operations) bound to
//! URL patterns under a common prefix; views render through overridable
//! Tera templates and talk to the store through the [`Datastore`] trait.
//!
//! ## Features
//!
//! - **View registry**: views keyed by model path and action, resolved from URL patterns
//! - **Nested models**: views of child models scoped to an ancestor key
//! - **Filters and sorting**: request-driven query composition with pagination
//! - **Generated forms**: model schemas converted to forms, subforms and list widgets
//! - **Operations**: confirmable actions on a single instance, delete included
//! - **Polymodels**: create views that let the user pick a subclass first
//! - **Permissions**: per-kind, per-action checks through an [`Authenticator`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kibble::prelude::*;
//!
//! let author = Arc::new(
//!     ModelSchema::new("Author")
//!         .property(PropertyDef::new("name", PropertyType::String).required()),
//! );
//!
//! KibbleBuilder::new()
//!     .with_datastore(InMemoryDatastore::new())
//!     .register_views(standard_views(author, vec![]))
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```
//!
//! [`Datastore`]: core::Datastore
//! [`Authenticator`]: core::Authenticator

pub mod config;
pub mod core;
pub mod forms;
pub mod query;
pub mod server;
pub mod storage;
pub mod views;

/// Install a `tracing` subscriber filtered by `RUST_LOG`
///
/// Defaults to `info` for this crate and `warn` elsewhere. Does nothing if
/// a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,kibble=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Document model ===
    pub use crate::core::{
        Entity, FieldFormat, FieldValue, IdValue, Key, ModelSchema, PropertyDef, PropertyType,
    };

    // === Collaborators ===
    pub use crate::core::{
        AuthContext, AuthPolicy, Authenticator, Datastore, NoAuthProvider, PolicyAuthenticator,
        ViewModule,
    };

    // === Events ===
    pub use crate::core::{ActionEvent, EventBus, EventEnvelope, EventPhase};

    // === Errors ===
    pub use crate::core::{KibbleError, StorageError};

    // === Queries ===
    pub use crate::query::{
        BoolFilter, ChoicesFilter, DateTimeFilter, EqualityFilter, FilterComposer, KeyFilter,
        Paginator, QueryComposer, QueryFilter, SortComposer, SortField, TypeTagFilter,
    };

    // === Forms ===
    pub use crate::forms::{FormOptions, KibbleModelConverter, ListWidget, ModelConverter};

    // === Views ===
    pub use crate::views::{
        DeleteRunner, Fieldset, FormViewOptions, ListColumn, ListOptions, OperationFailure,
        OperationOptions, OperationOutcome, OperationRunner, ViewDefinition, standard_views,
    };

    // === Storage ===
    pub use crate::storage::InMemoryDatastore;

    // === Config ===
    pub use crate::config::{KibbleConfig, KindGroup, PermissionsConfig};

    // === Server ===
    pub use crate::server::{Kibble, KibbleBuilder, TemplateRenderer, TeraRenderer};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
