#![deny(missing_docs)]
#![doc = "Core error, metadata snapshot and identity types shared by the result store, the table backend and the run lifecycle."]

pub mod errors;
mod identity;
mod metadata;
mod scope;
pub mod serde;

pub use errors::{ErrorInfo, VrsError};
pub use identity::{compute_identifier, metadata_digest};
pub use metadata::{Metadata, DATE_KEY, NAME_KEY, VERSION_KEY};
pub use scope::ExperimentScope;
