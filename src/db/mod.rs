//! Registry persistence
//!
//! The registry is a single JSON document on disk, reloaded at the start of
//! every scan cycle and rewritten atomically after each batch.

pub mod models;
pub mod registry;

pub use models::{MediaType, RecognizedKey, RegistryMediaItem};
pub use registry::{
    LoadOutcome, PruneSummary, RegistryDocument, RegistryStats, RegistryStorage, path_key,
};
