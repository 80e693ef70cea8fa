//! # Exported Symbols
//!
//! Name to address table a loaded image is bound against.

use alloc::collections::BTreeMap;
use alloc::string::String;

/// Symbols exported to loaded images
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    by_name: BTreeMap<String, usize>,
}

impl SymbolTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            by_name: BTreeMap::new(),
        }
    }

    /// Export `name` at `address`, returning the previous address
    pub fn insert(&mut self, name: &str, address: usize) -> Option<usize> {
        self.by_name.insert(String::from(name), address)
    }

    /// Withdraw an export
    pub fn remove(&mut self, name: &str) -> Option<usize> {
        self.by_name.remove(name)
    }

    /// Find an exported symbol by name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Number of exports
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Iterate exports in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_name.iter().map(|(name, &addr)| (name.as_str(), addr))
    }
}

impl<'a> FromIterator<(&'a str, usize)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, usize)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, address) in iter {
            table.insert(name, address);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let table: SymbolTable = [("printf", 0x1000), ("malloc", 0x2000)].into_iter().collect();
        assert_eq!(table.len(), 2);
        assert_eq!(table.find("printf"), Some(0x1000));
        assert_eq!(table.find("free"), None);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut table = SymbolTable::new();
        assert!(table.is_empty());
        assert_eq!(table.insert("x", 1), None);
        assert_eq!(table.insert("x", 2), Some(1));
        assert_eq!(table.remove("x"), Some(2));
        assert!(table.is_empty());
    }

    #[test]
    fn test_iteration_is_sorted() {
        let table: SymbolTable = [("b", 2), ("a", 1)].into_iter().collect();
        let names: alloc::vec::Vec<_> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
