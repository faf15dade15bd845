//! Read-only view over one scrape's performance objects.

use std::collections::HashMap;

use super::CollectError;
use crate::perflib::PerfObject;

/// Objects of one snapshot keyed by object name.
///
/// Built once per scrape and shared by `Arc` across all collectors; never
/// mutated afterwards.
#[derive(Debug, Default)]
pub struct ScrapeContext {
    objects: HashMap<String, PerfObject>,
}

impl ScrapeContext {
    /// Indexes `objects` by name. If a name repeats, the first object wins.
    pub fn new(objects: Vec<PerfObject>) -> Self {
        let mut by_name = HashMap::with_capacity(objects.len());
        for object in objects {
            by_name.entry(object.name.clone()).or_insert(object);
        }
        Self { objects: by_name }
    }

    /// The object called `name`, or `MissingObject`.
    pub fn object(&self, name: &str) -> Result<&PerfObject, CollectError> {
        self.objects
            .get(name)
            .ok_or_else(|| CollectError::MissingObject(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
