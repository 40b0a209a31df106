//! Shared string interner.
//!
//! String constants lower to symbol indices. The table is shared by all emitted
//! statements and stays append-only both during translation and while rules
//! fire in the interpreter; readers always observe a consistent table.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    index: HashMap<String, usize>,
    symbols: Vec<String>,
}

/// Append-only symbol table mapping strings to dense indices.
///
/// Cloning is cheap and shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    inner: Arc<RwLock<Inner>>,
}

impl SymbolTable {
    /// Create a new empty symbol table
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern a string, returning its index. Existing symbols keep their index.
    pub fn lookup(&self, symbol: &str) -> usize {
        if let Some(&idx) = self.inner.read().index.get(symbol) {
            return idx;
        }
        let mut inner = self.inner.write();
        // another writer may have interned it between the two locks
        if let Some(&idx) = inner.index.get(symbol) {
            return idx;
        }
        let idx = inner.symbols.len();
        inner.symbols.push(symbol.to_string());
        inner.index.insert(symbol.to_string(), idx);
        idx
    }

    /// Resolve an index back to its string, if interned.
    pub fn resolve(&self, idx: usize) -> Option<String> {
        self.inner.read().symbols.get(idx).cloned()
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.inner.read().symbols.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
