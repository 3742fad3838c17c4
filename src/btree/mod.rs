//! B+ tree: page layout, tree operations and cursors.

mod cursor;
pub mod node;
mod tree;

pub use cursor::Cursor;
pub use tree::{Tree, TreeConfig};
