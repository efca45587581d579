pub mod backoff;
pub mod catalog;
pub mod errors;
pub mod knobs;
pub mod logging;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use backoff::Backoff;
pub use catalog::{Catalog, CatalogReader};
pub use errors::{ErrorCode, ErrorMetadata, ErrorMetadataAnyhowExt};
pub use runtime::{Runtime, TokioRuntime};
