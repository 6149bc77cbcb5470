// dict.rs

use crate::error::IndexError;
use indexmap::IndexSet;

/// Insertion-ordered bijection between reference names and dense ids.
///
/// The id of a name equals the order in which it was first interned, so the
/// nth name in a sorted input file gets id n. A dictionary loaded from an
/// index file is never mutated afterwards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReferenceDictionary {
    names: IndexSet<String>,
}

impl ReferenceDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, inserting it if unseen.
    ///
    /// Names are stored NUL-terminated on disk, so embedded NULs are refused.
    pub fn intern(&mut self, name: &str) -> Result<usize, IndexError> {
        if name.as_bytes().contains(&0) {
            return Err(IndexError::invalid_record(format!(
                "reference name {:?} contains a NUL byte",
                name
            )));
        }
        Ok(self.names.insert_full(name.to_string()).0)
    }

    pub fn tid(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn name(&self, tid: usize) -> Option<&str> {
        self.names.get_index(tid).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_assigns_dense_ids() {
        let mut dict = ReferenceDictionary::new();
        assert_eq!(dict.intern("chr1").unwrap(), 0);
        assert_eq!(dict.intern("chr2").unwrap(), 1);
        assert_eq!(dict.intern("chr1").unwrap(), 0); // already present
        assert_eq!(dict.intern("chrX").unwrap(), 2);

        assert_eq!(dict.tid("chr2"), Some(1));
        assert_eq!(dict.tid("chrM"), None);
        assert_eq!(dict.name(2), Some("chrX"));
        assert_eq!(dict.name(3), None);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut dict = ReferenceDictionary::new();
        for name in ["chr10", "chr2", "chr1"] {
            dict.intern(name).unwrap();
        }
        let names: Vec<_> = dict.iter().collect();
        assert_eq!(names, vec!["chr10", "chr2", "chr1"]);
    }

    #[test]
    fn test_nul_rejected() {
        let mut dict = ReferenceDictionary::new();
        assert!(dict.intern("chr\01").is_err());
    }
}
