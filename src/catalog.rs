//! ID-keyed collection of sources

use std::collections::HashMap;

use crate::source::Source;

/// Catalogue of detections keyed by source ID.
///
/// IDs are unique; inserting a source under an ID that is already present
/// overwrites the existing entry with a warning.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: HashMap<u32, Source>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Source) {
        if self.sources.contains_key(&source.id()) {
            log::warn!("overwriting existing source with ID {}", source.id());
        }
        self.sources.insert(source.id(), source);
    }

    /// Replace the source stored under `id`; missing IDs create a new
    /// entry with a warning
    pub fn update(&mut self, id: u32, source: Source) {
        if !self.sources.contains_key(&id) {
            log::warn!("source with ID {id} does not exist, creating new entry");
        }
        self.sources.insert(id, source);
    }

    pub fn source(&self, id: u32) -> Option<&Source> {
        self.sources.get(&id)
    }

    pub fn source_mut(&mut self, id: u32) -> Option<&mut Source> {
        self.sources.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Source> {
        self.sources.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Source IDs in ascending order, for deterministic processing
    pub fn sorted_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sources.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Unit;

    #[test]
    fn duplicate_id_overwrites() {
        let mut catalog = SourceCatalog::new();
        let mut first = Source::new(5, "first");
        first.set_value("X", 1.0, Unit::dimensionless());
        catalog.insert(first);

        catalog.insert(Source::new(5, "second"));
        assert_eq!(catalog.len(), 1);
        let source = catalog.source(5).unwrap();
        assert_eq!(source.name(), "second");
        assert!(source.value_of("X").is_nan());
    }

    #[test]
    fn update_replaces_or_creates() {
        let mut catalog = SourceCatalog::new();
        catalog.insert(Source::new(3, "old"));
        catalog.update(3, Source::new(3, "new"));
        assert_eq!(catalog.source(3).unwrap().name(), "new");

        catalog.update(8, Source::new(8, "fresh"));
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains(8));
    }

    #[test]
    fn missing_id_is_none() {
        let catalog = SourceCatalog::new();
        assert!(catalog.source(42).is_none());
    }

    #[test]
    fn sorted_ids_ascending() {
        let mut catalog = SourceCatalog::new();
        for id in [9, 2, 17, 4] {
            catalog.insert(Source::new(id, ""));
        }
        assert_eq!(catalog.sorted_ids(), vec![2, 4, 9, 17]);
    }
}
