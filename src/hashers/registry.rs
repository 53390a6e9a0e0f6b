// registry.rs - Hasher registry for managing available digests

use super::traits::SequenceHasher;
use super::{Md5Hasher, Sha256Hasher};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry for available hashers
pub struct HasherRegistry {
    hashers: BTreeMap<String, Arc<dyn SequenceHasher>>,
}

impl HasherRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            hashers: BTreeMap::new(),
        };

        registry.register_hasher("sha256", Arc::new(Sha256Hasher));
        registry.register_hasher("md5", Arc::new(Md5Hasher));

        registry
    }

    /// Register a new hasher
    pub fn register_hasher(&mut self, name: &str, hasher: Arc<dyn SequenceHasher>) {
        self.hashers.insert(name.to_string(), hasher);
    }

    /// Get a shared handle to a hasher by name
    pub fn get_hasher(&self, name: &str) -> Option<Arc<dyn SequenceHasher>> {
        self.hashers.get(name).cloned()
    }

    pub fn has_hasher(&self, name: &str) -> bool {
        self.hashers.contains_key(name)
    }

    /// List all available hashers as (name, description)
    pub fn list_hashers(&self) -> Vec<(&str, &str)> {
        self.hashers
            .iter()
            .map(|(name, h)| (name.as_str(), h.description()))
            .collect()
    }

    pub fn get_hasher_names(&self) -> Vec<&str> {
        self.hashers.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for HasherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
