pub mod item;

pub use item::{FileKind, WorkItem};
