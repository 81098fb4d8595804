mod git_cli;
mod local;
mod loose;
mod memory;
mod traits;

pub use git_cli::GitCliStore;
pub use local::LocalObjectStore;
pub use loose::{write_loose_object, LooseObjectStore};
pub use memory::MemoryStore;
pub use traits::ObjectStore;
