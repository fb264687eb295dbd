//! The seam between the runtime and storage backends.
//!
//! A provider enumerates what a set of layers contains and fetches bytes on
//! demand. Enumeration reads index metadata only; it never writes and can be
//! called any number of times.

mod memory;
mod registry;

pub use memory::StaticProvider;
pub use registry::RegistryContentProvider;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::BundleResult;
use crate::model::{MatEntry, ResolvedBundle};

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Lazily enumerate the entries of `layers`, in layer order.
    fn iter_entries<'a>(
        &'a self,
        resolved: &'a ResolvedBundle,
        layers: &'a [String],
    ) -> BoxStream<'a, BundleResult<MatEntry>>;

    /// Fetch the bytes behind `entry`: a registry blob for ORAS entries, the
    /// external object otherwise. Callers verify the hash.
    async fn fetch(&self, resolved: &ResolvedBundle, entry: &MatEntry) -> BundleResult<Bytes>;
}
