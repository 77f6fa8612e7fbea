use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::info;

use crate::domain::{GuardDefinition, OperationBinding};
use crate::error::ConfigurationError;

use super::table::GuardTable;

/// One published configuration generation.
#[derive(Debug)]
pub struct Snapshot {
    pub number: u64,
    pub table: Arc<GuardTable>,
}

/// Guards resolved for one operation, all from the same generation.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub operation_id: String,
    pub binding: Arc<OperationBinding>,
    /// Declaration order, outermost first
    pub guards: SmallVec<[Arc<GuardDefinition>; 4]>,
    /// Guard references that could not be resolved
    pub errors: Vec<ConfigurationError>,
    pub generation: u64,
}

impl Resolution {
    pub fn is_unguarded(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Maps operation ids to guard definitions.
///
/// The whole table is swapped at once; a reader holds the lock only long
/// enough to clone the current snapshot, so a resolution never mixes two
/// generations.
#[derive(Debug)]
pub struct ConfigResolver {
    current: RwLock<Arc<Snapshot>>,
}

impl ConfigResolver {
    pub fn new(table: GuardTable) -> Self {
        ConfigResolver {
            current: RwLock::new(Arc::new(Snapshot {
                number: 1,
                table: Arc::new(table),
            })),
        }
    }

    pub fn empty() -> Self {
        ConfigResolver::new(GuardTable::empty())
    }

    /// Current generation.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().number
    }

    pub fn version(&self) -> String {
        self.current.read().table.version().to_string()
    }

    /// Publish a new table. Returns the new generation number.
    pub fn swap(&self, table: GuardTable) -> u64 {
        let table = Arc::new(table);
        let mut current = self.current.write();
        let number = current.number + 1;

        info!(
            generation = number,
            version = %table.version(),
            guards = table.guard_count(),
            operations = table.operation_count(),
            "Guard configuration swapped"
        );

        *current = Arc::new(Snapshot { number, table });
        number
    }

    /// Guards bound to an operation, in declaration order.
    ///
    /// Operations with no binding resolve to no guards. Unknown guard ids
    /// are skipped and reported as configuration errors.
    pub fn resolve(&self, operation_id: &str) -> Resolution {
        let snapshot = self.current();
        let table = &snapshot.table;

        let binding = match table.operation(operation_id) {
            Some(binding) => binding.clone(),
            None => Arc::new(OperationBinding::unbound()),
        };

        let mut guards = SmallVec::new();
        let mut errors = Vec::new();

        for guard_id in &binding.guards {
            match table.guard(guard_id) {
                Some(guard) => guards.push(guard.clone()),
                None => errors.push(ConfigurationError::new(
                    operation_id,
                    Some(guard_id),
                    format!("unknown guard '{}'", guard_id),
                )),
            }
        }

        Resolution {
            operation_id: operation_id.to_string(),
            binding,
            guards,
            errors,
            generation: snapshot.number,
        }
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        ConfigResolver::empty()
    }
}
