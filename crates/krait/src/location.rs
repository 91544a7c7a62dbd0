//! Source positions, spans, and the handle↔path table.
//!
//! Locations come in two shapes. The *reference* form ([`Location`]) carries
//! the source file as a [`Handle`] — a small interned id — so locations stay
//! compact enough to use as map keys (scope skip-sets, error dedup buckets).
//! The *instantiated* form ([`InstantiatedLocation`]) carries the resolved
//! path string and only exists at the rendering boundary; conversion goes
//! through the [`HandleTable`].

use std::fmt;

use ahash::AHashMap;

/// A point in a source file. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    #[must_use]
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Interned id of a source file path.
///
/// Uses `u32` to keep locations small; the id is only meaningful together
/// with the [`HandleTable`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct Handle(u32);

impl Handle {
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A byte-level span in a source file, keyed by [`Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub handle: Handle,
    pub start: Position,
    pub stop: Position,
}

impl Location {
    #[must_use]
    pub const fn new(handle: Handle, start: Position, stop: Position) -> Self {
        Self { handle, start, stop }
    }

    /// A span covering a single point, used for synthetic nodes.
    #[must_use]
    pub const fn point(handle: Handle, position: Position) -> Self {
        Self {
            handle,
            start: position,
            stop: position,
        }
    }

    /// Resolves the handle through `handles` into a renderable location.
    ///
    /// Unknown handles resolve to `"?"` rather than failing: rendering a
    /// diagnostic must not itself be able to fail.
    #[must_use]
    pub fn instantiate(&self, handles: &HandleTable) -> InstantiatedLocation {
        InstantiatedLocation {
            path: handles.get(self.handle).unwrap_or("?").to_owned(),
            start: self.start,
            stop: self.stop,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.stop)
    }
}

/// A span with its path resolved, used for user-visible messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct InstantiatedLocation {
    pub path: String,
    pub start: Position,
    pub stop: Position,
}

impl fmt::Display for InstantiatedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.path, self.start, self.stop)
    }
}

/// Bidirectional path↔handle table.
///
/// Populated once during project setup, then frozen; analysis phases only
/// read. [`HandleTable::freeze`] flips the table read-only — further
/// [`HandleTable::intern`] calls panic, which turns accidental mid-analysis
/// writes into loud failures instead of data races in the hosting system's
/// shared-memory setup.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct HandleTable {
    paths: Vec<String>,
    by_path: AHashMap<String, Handle>,
    frozen: bool,
}

impl HandleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `path`, returning the existing handle if already present.
    pub fn intern(&mut self, path: &str) -> Handle {
        assert!(!self.frozen, "handle table is frozen");
        if let Some(handle) = self.by_path.get(path) {
            return *handle;
        }
        let handle = Handle(u32::try_from(self.paths.len()).expect("handle table overflow"));
        self.paths.push(path.to_owned());
        self.by_path.insert(path.to_owned(), handle);
        handle
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&str> {
        self.paths.get(handle.index()).map(String::as_str)
    }

    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Handle> {
        self.by_path.get(path).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut handles = HandleTable::new();
        let first = handles.intern("pkg/a.py");
        let second = handles.intern("pkg/a.py");
        assert_eq!(first, second);
        assert_eq!(handles.get(first), Some("pkg/a.py"));
    }

    #[test]
    fn instantiate_resolves_path() {
        let mut handles = HandleTable::new();
        let handle = handles.intern("pkg/a.py");
        handles.freeze();
        let location = Location::new(handle, Position::new(3, 0), Position::new(3, 7));
        let instantiated = location.instantiate(&handles);
        assert_eq!(instantiated.path, "pkg/a.py");
        assert_eq!(instantiated.start.line, 3);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn frozen_table_rejects_writes() {
        let mut handles = HandleTable::new();
        handles.freeze();
        handles.intern("pkg/a.py");
    }
}
