//! The process-wide current route table.
//!
//! # Responsibilities
//! - Publish table snapshots through a single atomic reference
//! - Serialize mutations so each diff is taken against the snapshot it replaces
//! - Prune metrics of routes that disappeared from the published table
//!
//! # Design Decisions
//! - Readers load the snapshot lock-free and never observe a partial update
//! - Writers hold one mutex across load, build, publish and registry sync
//! - Registry sync only unregisters; timers are created when a target is
//!   inserted into a table

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::observability::metrics::{MetricsRegistry, NoopRegistry};
use crate::routing::table::{RouteError, RouteDef, Table, Target};

/// Shared handle to the currently published [`Table`].
#[derive(Debug)]
pub struct RouteTable {
    current: ArcSwap<Table>,
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
    registry: Arc<dyn MetricsRegistry>,
}

impl RouteTable {
    /// Create an empty table reporting to `registry`.
    pub fn new(registry: Arc<dyn MetricsRegistry>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Table::new()),
            writer: Mutex::new(()),
            registry,
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Table> {
        self.current.load_full()
    }

    /// The registry this table keeps in sync.
    pub fn registry(&self) -> &Arc<dyn MetricsRegistry> {
        &self.registry
    }

    /// Add a target and publish the successor table.
    pub fn add_route(&self, def: &RouteDef) -> Result<Arc<Table>, RouteError> {
        self.update(|table| table.add_route(self.registry.as_ref(), def))
    }

    /// Remove a target and publish the successor table.
    pub fn del_route(&self, service: &str, host: &str, path: &str, target: &str) -> Arc<Table> {
        match self.update(|table| Ok::<_, Infallible>(table.del_route(service, host, path, target))) {
            Ok(table) => table,
            Err(never) => match never {},
        }
    }

    /// Replace the whole table with one built from `defs`.
    ///
    /// On error nothing is published and the current table stays in effect.
    pub fn load(&self, defs: &[RouteDef]) -> Result<Arc<Table>, RouteError> {
        // A rejected load must not create timers.
        Table::from_routes(&NoopRegistry, defs)?;
        self.update(|_| Table::from_routes(self.registry.as_ref(), defs))
    }

    /// Pick a target for an SNI hostname from the current snapshot.
    pub fn lookup_host(&self, hostname: &str) -> Option<Arc<Target>> {
        self.current.load().lookup_host(hostname)
    }

    /// Pick a target for an HTTP host and path from the current snapshot.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Arc<Target>> {
        self.current.load().lookup(host, path)
    }

    fn update<F, E>(&self, build: F) -> Result<Arc<Table>, E>
    where
        F: FnOnce(&Table) -> Result<Table, E>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let old = self.current.load_full();
        let new = Arc::new(build(&old)?);
        self.current.store(Arc::clone(&new));

        let removed = sync_registry(&old, &new, self.registry.as_ref());
        tracing::debug!(
            routes = new.routes().len(),
            metrics_removed = removed,
            "Route table published"
        );
        Ok(new)
    }
}

/// Unregister every metric of `old` that `new` no longer implies.
///
/// Returns the number of identifiers removed. New identifiers already have
/// timers from target insertion.
pub fn sync_registry(old: &Table, new: &Table, registry: &dyn MetricsRegistry) -> usize {
    let new_names = new.metric_names();
    let mut removed = 0;
    for name in old.metric_names().difference(&new_names) {
        registry.unregister(name);
        removed += 1;
    }
    removed
}
