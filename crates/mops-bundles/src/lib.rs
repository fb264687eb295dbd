//! ModelOps bundles: versioned code, config and data distributed as
//! content-addressed layers.
//!
//! Small files live in an OCI-style registry, large ones in external object
//! storage. The runtime resolves a [`BundleRef`] to an immutable manifest and
//! materializes a role's layers into a directory, writing pointer files for
//! external data that was not fetched. The planner decides where each file
//! goes when publishing, and the exporter turns a workdir into a
//! byte-reproducible archive.

pub mod canonical;
pub mod config;
pub mod digest;
pub mod error;
pub mod export;
mod fsio;
pub mod model;
pub mod path_safety;
pub mod planner;
pub mod pointer;
pub mod provider;
pub mod publish;
pub mod runtime;

pub use config::{build_repository, BundleConfig};
pub use error::{BundleError, BundleResult, Conflict, ConflictReason, ErrorKind};
pub use export::{export, Compression, ExportOptions, ExportSummary};
pub use model::{
    BundleManifest, BundleRef, EntryKind, LayerIndex, LayerIndexEntry, MatEntry, RefMode,
    ResolvedBundle, StorageTier,
};
pub use planner::{
    create_bundle_manifest, create_layer_indexes, detect_changes, plan_storage, scan_directory,
    BundleSpec, StoragePlan,
};
pub use pointer::{pointer_path_for, read_pointer, write_pointer, PointerFile};
pub use provider::{ContentProvider, RegistryContentProvider, StaticProvider};
pub use publish::{publish, PublishOptions, PublishReceipt};
pub use runtime::{materialize, resolve, MaterializeOptions, Provenance};
