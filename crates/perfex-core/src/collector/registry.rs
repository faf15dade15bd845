//! Name → constructor mapping for collectors.
//!
//! Built explicitly at startup from (name, factory) pairs; the set of
//! enabled collectors is then resolved against it once.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{CollectError, Collector, CpuCollector};

/// Constructs a fresh collector.
pub type CollectorFactory = fn() -> Result<Box<dyn Collector>, CollectError>;

/// Error type for registry construction and lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Two factories registered under one name.
    Duplicate(String),
    /// An enabled collector name has no factory.
    UnknownCollector(String),
    /// A factory failed.
    Init { name: String, error: CollectError },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Duplicate(name) => {
                write!(f, "collector {:?} registered more than once", name)
            }
            RegistryError::UnknownCollector(name) => write!(f, "unknown collector {:?}", name),
            RegistryError::Init { name, error } => {
                write!(f, "failed to create collector {:?}: {}", name, error)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Read-only collector registry.
pub struct CollectorRegistry {
    factories: BTreeMap<&'static str, CollectorFactory>,
}

impl CollectorRegistry {
    pub fn builder() -> CollectorRegistryBuilder {
        CollectorRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Every collector shipped with this crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::builder()
            .register("cpu", CpuCollector::factory)
            .build()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Constructs the enabled collectors in the given order. Repeated names
    /// are constructed once.
    pub fn instantiate<S: AsRef<str>>(
        &self,
        enabled: &[S],
    ) -> Result<Vec<Arc<dyn Collector>>, RegistryError> {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::with_capacity(enabled.len());
        let mut seen = Vec::with_capacity(enabled.len());

        for name in enabled {
            let name = name.as_ref().trim();
            if seen.contains(&name) {
                continue;
            }
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;
            let collector = factory().map_err(|error| RegistryError::Init {
                name: name.to_string(),
                error,
            })?;
            collectors.push(Arc::from(collector));
            seen.push(name);
        }

        Ok(collectors)
    }
}

/// Accumulates (name, factory) pairs.
pub struct CollectorRegistryBuilder {
    entries: Vec<(&'static str, CollectorFactory)>,
}

impl CollectorRegistryBuilder {
    pub fn register(mut self, name: &'static str, factory: CollectorFactory) -> Self {
        self.entries.push((name, factory));
        self
    }

    pub fn build(self) -> Result<CollectorRegistry, RegistryError> {
        let mut factories = BTreeMap::new();
        for (name, factory) in self.entries {
            if factories.insert(name, factory).is_some() {
                return Err(RegistryError::Duplicate(name.to_string()));
            }
        }
        Ok(CollectorRegistry { factories })
    }
}
