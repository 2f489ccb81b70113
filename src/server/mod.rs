//! Server module: the admin host, its HTTP entry point and its assembly
//!
//! [`KibbleBuilder`] collects the configuration, the datastore, the
//! collaborators and the view definitions, and produces either the shared
//! [`Kibble`] host or a ready-to-serve axum `Router`.

pub mod builder;
pub mod handlers;
pub mod host;
pub mod registry;
pub mod render;

pub use builder::KibbleBuilder;
pub use handlers::router;
pub use host::Kibble;
pub use registry::ViewRegistry;
pub use render::{TemplateRenderer, TeraRenderer};
