//! # Executable Search Path
//!
//! Turns a relative program name into absolute candidate paths, one per
//! directory of a `PATH`-style list.

use crate::loader::PathSearch;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// `PATH`-style directory list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExePath {
    dirs: Vec<String>,
}

impl ExePath {
    /// Parse a colon separated list such as `"/bin:/usr/bin"`
    ///
    /// Empty and relative entries are ignored.
    pub fn new(path: &str) -> Self {
        let dirs = path
            .split(':')
            .filter(|dir| dir.starts_with('/'))
            .map(|dir| String::from(dir.trim_end_matches('/')))
            .collect();
        Self { dirs }
    }

    /// Directories in search order
    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }
}

impl PathSearch for ExePath {
    fn candidates<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        Box::new(self.dirs.iter().map(move |dir| format!("{}/{}", dir, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_in_order() {
        let search = ExePath::new("/bin:/usr/bin/:/sbin");
        let candidates: Vec<String> = search.candidates("hello").collect();
        assert_eq!(candidates, ["/bin/hello", "/usr/bin/hello", "/sbin/hello"]);
    }

    #[test]
    fn test_skips_empty_and_relative_entries() {
        let search = ExePath::new(":bin::/opt/bin");
        assert_eq!(search.dirs(), ["/opt/bin"]);
    }

    #[test]
    fn test_root_directory() {
        let search = ExePath::new("/");
        let candidates: Vec<String> = search.candidates("init").collect();
        assert_eq!(candidates, ["/init"]);
    }

    #[test]
    fn test_empty_path() {
        let search = ExePath::new("");
        assert_eq!(search.candidates("x").count(), 0);
    }
}
