//! # magni-storage
//!
//! The storage engine of a single-file embedded relational database:
//! typed rows keyed by a 64-bit rowid, persisted into fixed-size pages,
//! with ordered iteration, point lookup, insertion and deletion.
//!
//! ## Architecture
//!
//! - **Byte codec** (`types`): fixed-width and varint encodings
//! - **Pager** (`pager`): page-granular file I/O behind a bounded frame
//!   cache with pin/dirty/evict discipline
//! - **Record codec** (`record`): serial-typed `(rowid, values)` cells
//!   with size prediction, cheap probes, and borrowing deserialization
//! - **B+ tree** (`btree`): rowid-ordered index with leaf and interior
//!   splits, linked leaves, and stack-based cursors
//! - **Schema catalog** (`schema`): table descriptors stored as rows of
//!   a reserved tree on page 1
//!
//! ## Usage
//!
//! ```rust,ignore
//! use magni_storage::{Column, ColumnType, Config, Database, Value};
//!
//! let db = Database::open(Config::new("my.db"))?;
//! db.create_table(
//!     "users",
//!     vec![
//!         Column::new("id", ColumnType::Integer).primary_key(),
//!         Column::new("name", ColumnType::Text).not_null(),
//!     ],
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
//! )?;
//!
//! let users = db.table("users")?;
//! users.insert(1, &[Value::Integer(1), Value::text("ada")])?;
//! let row = users.find(1)?;
//! db.close()?;
//! ```

pub mod btree;
pub mod error;
pub mod pager;
pub mod record;
pub mod schema;
pub mod types;

pub use btree::{Cursor, Tree, TreeConfig};
pub use error::{Result, StorageError};
pub use pager::Pager;
pub use record::{Record, Value};
pub use schema::{Catalog, Column, ColumnType, TableInfo};
pub use types::{PageId, PAGE_SIZE};

use crate::btree::node::{NodeMut, NodeRef};
use std::path::PathBuf;
use std::sync::Arc;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file
    pub path: PathBuf,
    /// Page cache size in frames (default 1000; clamped to a small
    /// minimum so tree operations can pin their working set)
    pub cache_capacity: usize,
    /// Options applied to every tree opened through this handle
    pub tree: TreeConfig,
}

impl Config {
    /// Configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache_capacity: 1000,
            tree: TreeConfig::default(),
        }
    }

    /// Set the page cache size
    pub fn cache_capacity(mut self, frames: usize) -> Self {
        self.cache_capacity = frames;
        self
    }

    /// Enable or disable duplicate-rowid checking on data trees
    pub fn check_duplicates(mut self, enabled: bool) -> Self {
        self.tree.check_duplicates = enabled;
        self
    }
}

/// Main database handle: a pager plus the schema catalog on page 1
pub struct Database {
    pager: Arc<Pager>,
    catalog: Catalog,
    tree_config: TreeConfig,
}

impl Database {
    /// Open or create a database at the configured path.
    ///
    /// A fresh file gets page 1 initialized: the database header in its
    /// first 100 bytes and an empty schema tree root after them.
    pub fn open(config: Config) -> Result<Self> {
        let pager = Arc::new(Pager::open(&config.path, config.cache_capacity)?);
        {
            let (guard, created) = pager.fetch_or_allocate(PageId::SCHEMA_ROOT)?;
            if created {
                let mut pref = guard.write();
                NodeMut::init_leaf(pref.as_bytes_mut(), PageId::SCHEMA_ROOT);
            } else {
                let pref = guard.read();
                NodeRef::read(pref.as_bytes(), PageId::SCHEMA_ROOT)?;
            }
        }
        let catalog = Catalog::open(pager.clone());
        Ok(Self {
            pager,
            catalog,
            tree_config: config.tree,
        })
    }

    /// Flush everything and close. Outstanding page pins are a caller
    /// bug and trip an assertion.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    /// Allocate a root page for a new table and register its descriptor.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
        sql: &str,
    ) -> Result<TableInfo> {
        schema::validate_columns(&columns)?;
        if self.catalog.contains_table(name)? {
            return Err(StorageError::schema(format!("table {name} already exists")));
        }
        let tree = Tree::create(self.pager.clone(), self.tree_config.clone())?;
        let info = TableInfo {
            name: name.to_string(),
            root_page: tree.root_page(),
            sql: sql.to_string(),
            columns,
        };
        self.catalog.add_table(&info)?;
        Ok(info)
    }

    /// Tree handle for a table's rows
    pub fn table(&self, name: &str) -> Result<Tree> {
        let info = self
            .catalog
            .table(name)?
            .ok_or_else(|| StorageError::schema(format!("no such table: {name}")))?;
        Ok(Tree::open(
            self.pager.clone(),
            info.root_page,
            self.tree_config.clone(),
        ))
    }

    /// Descriptor lookup by name
    pub fn table_info(&self, name: &str) -> Result<Option<TableInfo>> {
        self.catalog.table(name)
    }

    /// All table descriptors, sorted by name
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.catalog.list_tables()
    }

    /// Remove a table's descriptor (its pages are not reclaimed)
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.catalog.drop_table(name)
    }

    /// The schema catalog
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The underlying pager, for explicit checkpoints
    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Write all dirty pages
    pub fn flush(&self) -> Result<()> {
        self.pager.flush_all()
    }

    /// Write all dirty pages and fsync
    pub fn sync(&self) -> Result<()> {
        self.pager.sync_file()
    }

    /// Page and cache statistics
    pub fn stats(&self) -> DbStats {
        DbStats {
            page_count: self.pager.page_count(),
            cache_capacity: self.pager.capacity(),
            cached_frames: self.pager.cached_frames(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Total pages in the file
    pub page_count: u32,
    /// Cache capacity in frames
    pub cache_capacity: usize,
    /// Frames currently cached
    pub cached_frames: usize,
}
