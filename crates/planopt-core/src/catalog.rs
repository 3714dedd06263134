//! # Catalog and Cluster Interfaces
//!
//! The optimizer consults two external collaborators:
//!
//! - A [`Catalog`] providing base-table statistics for scan nodes. A table the catalog
//!   knows nothing about yields [`TableStatistics::unknown`], which is a valid answer and
//!   not an error.
//! - A [`ClusterTopology`] reporting the number of active worker nodes, read once when a
//!   cost calculator is constructed.
//!
//! Both are shared read-only between concurrently running optimizer sessions, hence the
//! `Send + Sync` bounds. Retry and timeout policy for remote metadata belongs to the
//! implementation behind the trait.

use crate::plan::TableRef;
use crate::stats::TableStatistics;
use std::collections::HashMap;

/// Catalog provides base-table statistics.
pub trait Catalog: Send + Sync {
    fn table_statistics(&self, table: &TableRef) -> TableStatistics;
}

/// In-memory catalog for testing and for the HTTP front end.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<TableRef, TableStatistics>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableRef, stats: TableStatistics) {
        self.tables.insert(table, stats);
    }

    pub fn with_table(mut self, table: TableRef, stats: TableStatistics) -> Self {
        self.add_table(table, stats);
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn table_statistics(&self, table: &TableRef) -> TableStatistics {
        self.tables.get(table).cloned().unwrap_or_default()
    }
}

/// Source of the cluster size.
pub trait ClusterTopology: Send + Sync {
    fn active_node_count(&self) -> usize;
}

/// Fixed cluster size.
#[derive(Debug, Clone, Copy)]
pub struct StaticClusterTopology(pub usize);

impl ClusterTopology for StaticClusterTopology {
    fn active_node_count(&self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_is_unknown() {
        let catalog = InMemoryCatalog::new()
            .with_table(TableRef::new("tpch", "nation"), TableStatistics::new(25.0));
        let known = catalog.table_statistics(&TableRef::new("tpch", "nation"));
        assert_eq!(known.row_count.value(), Some(25.0));
        let missing = catalog.table_statistics(&TableRef::new("tpch", "region"));
        assert!(missing.row_count.is_unknown());
    }
}
