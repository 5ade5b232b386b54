//! Persistence of the document
//!
//! The vault never writes files itself; it mutates the shared in-memory
//! document and asks a `PersistenceAdapter` to flush it. Two backends:
//! 1. JSON file (the application data file)
//! 2. In-memory (tests and embedding)

mod json_file;
mod memory;
mod shared;
mod traits;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use shared::{DocumentInfo, SharedDocument};
pub use traits::PersistenceAdapter;
