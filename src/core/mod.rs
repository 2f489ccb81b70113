//! Core module containing the document model and collaborator traits

pub mod auth;
pub mod datastore;
pub mod error;
pub mod events;
pub mod field;
pub mod key;
pub mod labels;
pub mod model;
pub mod module;
pub mod query;
pub mod request;

pub use auth::{AuthContext, AuthPolicy, Authenticator, NoAuthProvider, PolicyAuthenticator};
pub use datastore::{Datastore, load_lineage};
pub use error::{
    ConfigError, KibbleError, RegistryError, RequestError, StorageError, TemplateError,
};
pub use events::{ActionEvent, EventBus, EventEnvelope, EventPhase};
pub use field::{FieldFormat, FieldValue, ValueType};
pub use key::{IdValue, Key, KeyError};
pub use labels::LabelService;
pub use model::{CLASS_PROPERTY, Entity, ModelSchema, PropertyDef, PropertyPath, PropertyType};
pub use module::ViewModule;
pub use query::{FetchOptions, Operator, Predicate, Query};
pub use request::{RequestArgs, RequestState, ViewArgs};
