//! Storage seams for ModelOps bundles.
//!
//! Two collaborators sit behind traits so the bundle runtime can be tested
//! without a network:
//!
//! - [`BundleRegistry`]: OCI-style manifests and content-addressed blobs.
//! - [`ExternalStore`]: objects addressed by `{scheme}://{container}/{key}` URIs.
//!
//! In-memory implementations of both ship here, plus an
//! [`ObjectStoreExternal`] adapter over the `object_store` crate for S3,
//! Azure Blob, GCS and local filesystem storage.

pub mod error;
pub mod external;
pub mod object_store_backend;
pub mod registry;
pub mod uri;

pub use error::{StoreError, StoreResult};
pub use external::{ExternalStat, ExternalStore, InMemoryExternalStore};
pub use object_store_backend::ObjectStoreExternal;
pub use registry::{BundleRegistry, InMemoryRegistry};
pub use uri::{ExternalUri, UriScheme};
