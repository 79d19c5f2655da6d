//! Config persistence: the on-disk format (`types`), the load/save codec
//! (`persist`), and a single serializing writer task (`writer`) that replaces
//! the original's 5-attempt busy-wait flag with one task owning all writes.

mod persist;
mod types;
mod writer;

pub use persist::{load, save};
pub use types::{ConfigTree, NodeServerEntry, OBFUSCATED_ELEMENTS};
pub use writer::{ConfigDelta, ConfigWriter};
