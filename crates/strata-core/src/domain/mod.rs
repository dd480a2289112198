//! Domain types for Strata builds, clones and deployments.

pub mod artifact;
pub mod clone_spec;
pub mod context;
pub mod error;
pub mod isolated;
pub mod location;

pub use artifact::{compute_content_hash, ArtifactKind, BuildArtifact};
pub use clone_spec::{CloneMode, CloneReport, CloneSelection, CloneSpec, TableRef};
pub use context::{ExecutionContext, LogicalNamespace, Materialization};
pub use error::{ConfigError, Result, StrataError};
pub use isolated::IsolatedNamespace;
pub use location::{validate_identifier, ObjectRef, SchemaRef};
