//! In-memory caches that keep listings and search fast while staying
//! coherent with a mutating filesystem.

pub mod index;
pub mod size;
pub mod walk;
pub mod warm;

pub use index::{IndexCache, IndexEntry};
pub use size::SizeCache;
pub use warm::warm_caches;
