//! Storage backends.

pub mod fs;
pub mod memory;
pub mod traits;

mod mutex_file;

pub use fs::FsStore;
pub use memory::InMemoryStore;
pub use traits::{
    validate_relative_path, ArtifactStore, LeaseStore, ReceiptLedger, RunStore, Storage,
};
