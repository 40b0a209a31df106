//! Per-clause value index.
//!
//! During the indexing pass over a clause body, every variable occurrence,
//! record definition point, and generator is mapped to a `(tuple-id, column)`
//! location. The operation-construction pass then reads values exclusively
//! through this index.

use crate::ast::Argument;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A `(tuple-id, column)` location inside the operation tree.
///
/// Ordered so that the first occurrence of a variable (lowest level, then
/// lowest column) is its canonical location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub tuple: usize,
    pub element: usize,
}

impl Location {
    pub fn new(tuple: usize, element: usize) -> Self {
        Location { tuple, element }
    }
}

/// Index of variable references, definition points, and generator slots for
/// a single clause.
#[derive(Debug, Clone, Default)]
pub struct ValueIndex {
    /// Variable name → all its locations; the smallest is canonical
    var_references: BTreeMap<String, BTreeSet<Location>>,
    /// Unpack level → the location the record value is read from
    definition_points: HashMap<usize, Location>,
    /// Generator argument (by structure) → its output slot
    generator_locs: Vec<(Argument, Location)>,
    /// Levels owned by generators; references into these are never equated
    generator_levels: HashSet<usize>,
}

impl ValueIndex {
    pub fn new() -> Self {
        ValueIndex::default()
    }

    /// Record one occurrence of a variable
    pub fn add_var_reference(&mut self, name: &str, location: Location) {
        self.var_references
            .entry(name.to_string())
            .or_default()
            .insert(location);
    }

    /// Canonical (earliest) location of a variable
    pub fn canonical_reference(&self, name: &str) -> Option<Location> {
        self.var_references
            .get(name)
            .and_then(|refs| refs.iter().next())
            .copied()
    }

    /// All locations of a variable, canonical first
    pub fn references(&self, name: &str) -> impl Iterator<Item = Location> + '_ {
        self.var_references
            .get(name)
            .into_iter()
            .flat_map(|refs| refs.iter().copied())
    }

    /// Iterate all variables with their reference sets, in name order
    pub fn variables(&self) -> impl Iterator<Item = (&str, &BTreeSet<Location>)> {
        self.var_references
            .iter()
            .map(|(name, refs)| (name.as_str(), refs))
    }

    /// Record where the value unpacked at `level` is read from
    pub fn set_definition_point(&mut self, level: usize, source: Location) {
        self.definition_points.insert(level, source);
    }

    /// Source location of the record unpacked at `level`
    pub fn definition_point(&self, level: usize) -> Option<Location> {
        self.definition_points.get(&level).copied()
    }

    /// Register a generator (aggregator or multi-result functor) slot
    pub fn set_generator_loc(&mut self, generator: Argument, location: Location) {
        self.generator_levels.insert(location.tuple);
        self.generator_locs.push((generator, location));
    }

    /// Slot of a generator, matched structurally
    pub fn generator_loc(&self, generator: &Argument) -> Option<Location> {
        self.generator_locs
            .iter()
            .find(|(arg, _)| arg == generator)
            .map(|(_, loc)| *loc)
    }

    /// Whether a tuple level belongs to a generator
    pub fn is_generator(&self, level: usize) -> bool {
        self.generator_levels.contains(&level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_is_smallest() {
        let mut index = ValueIndex::new();
        index.add_var_reference("x", Location::new(2, 0));
        index.add_var_reference("x", Location::new(0, 1));
        index.add_var_reference("x", Location::new(0, 3));
        assert_eq!(index.canonical_reference("x"), Some(Location::new(0, 1)));
    }

    #[test]
    fn test_duplicate_references_collapse() {
        let mut index = ValueIndex::new();
        index.add_var_reference("x", Location::new(1, 1));
        index.add_var_reference("x", Location::new(1, 1));
        assert_eq!(index.references("x").count(), 1);
    }

    #[test]
    fn test_generator_slots() {
        let mut index = ValueIndex::new();
        let generator = Argument::Variable("placeholder".to_string());
        index.set_generator_loc(generator.clone(), Location::new(3, 0));
        assert_eq!(index.generator_loc(&generator), Some(Location::new(3, 0)));
        assert!(index.is_generator(3));
        assert!(!index.is_generator(0));
    }

    #[test]
    fn test_definition_points() {
        let mut index = ValueIndex::new();
        index.set_definition_point(2, Location::new(0, 1));
        assert_eq!(index.definition_point(2), Some(Location::new(0, 1)));
        assert_eq!(index.definition_point(3), None);
    }
}
