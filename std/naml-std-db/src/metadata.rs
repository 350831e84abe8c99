///
/// Process-wide table metadata cache.
///
/// Column flags that cursor metadata cannot provide (primary key, multiple
/// key, unique, zero-fill, auto-increment, unsigned) come from an auxiliary
/// describe of the table. Describes are expensive, so the result is cached
/// across sessions, keyed by (connection URL, catalog, schema, table).
///
/// Entries are immutable `Arc`s. A cached entry is served only while it is
/// younger than `max_age`; older entries are rebuilt on the next lookup.
/// DDL-like statements drop the whole cache (see `ConnectionResource`).
///

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::config::MetadataConfig;
use crate::driver::ColumnDescriptor;
use crate::errors::DriverError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub url: String,
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl TableKey {
    pub fn new(
        url: impl Into<String>,
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }
}

#[derive(Debug)]
pub struct TableMetadata {
    key: TableKey,
    columns: Vec<ColumnDescriptor>,
    built_at: Instant,
}

impl TableMetadata {
    pub fn new(key: TableKey, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            key,
            columns,
            built_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &TableKey {
        &self.key
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.built_at.elapsed() < max_age
    }
}

pub struct TableMetadataCache {
    entries: Cache<TableKey, Arc<TableMetadata>>,
    max_age: Duration,
}

impl TableMetadataCache {
    pub fn new(capacity: u64, max_age: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { entries, max_age }
    }

    pub fn from_config(config: &MetadataConfig) -> Self {
        Self::new(config.capacity, config.max_age())
    }

    /// Cached entry for `key`, if present and still fresh.
    pub fn get(&self, key: &TableKey) -> Option<Arc<TableMetadata>> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.max_age))
    }

    pub fn insert(&self, key: TableKey, columns: Vec<ColumnDescriptor>) -> Arc<TableMetadata> {
        let entry = Arc::new(TableMetadata::new(key.clone(), columns));
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }

    /// Cached entry, or a fresh describe via `describe` stored for later
    /// lookups. Describe failures are returned and nothing is cached.
    pub fn get_or_describe<F>(
        &self,
        key: &TableKey,
        describe: F,
    ) -> Result<Arc<TableMetadata>, DriverError>
    where
        F: FnOnce() -> Result<Vec<ColumnDescriptor>, DriverError>,
    {
        if let Some(entry) = self.get(key) {
            return Ok(entry);
        }
        let columns = describe()?;
        Ok(self.insert(key.clone(), columns))
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl std::fmt::Debug for TableMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetadataCache")
            .field("entries", &self.entries.entry_count())
            .field("max_age", &self.max_age)
            .finish()
    }
}
