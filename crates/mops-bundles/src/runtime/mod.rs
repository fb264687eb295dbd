//! Bundle runtime: resolve a reference, then materialize a role into a workdir.

mod materialize;
mod provenance;
mod resolve;

pub use materialize::{materialize, select_role, MaterializeOptions};
pub use provenance::{read_provenance, write_provenance, Provenance, PROVENANCE_FILE};
pub use resolve::resolve;
