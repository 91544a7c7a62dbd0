//! The generic analysis-error record.
//!
//! Checkers instantiate [`AnalysisError`] with their own kind type; the
//! record owns the rendering (`description`, `to_json`), the deduplication
//! key, and the ordering used by on-disk caches. Two errors compare equal
//! when they share a location, a code, and an enclosing define — message
//! payloads do not participate, so re-renderings dedup cleanly.

use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
};

use crate::{
    ast::{Define, Statement, StatementKind},
    location::InstantiatedLocation,
};

/// An error category: stable code and name, message rendering, and the
/// structured inference payload.
pub trait ErrorKind: Clone {
    fn code(&self) -> u32;

    fn name(&self) -> &'static str;

    /// User-facing messages; the first one must stand alone, the rest are
    /// detail lines shown with error traces.
    fn messages(&self, concise: bool, define: &Define, location: &InstantiatedLocation) -> Vec<String>;

    /// Structured payload for clients that consume inference results.
    fn inference_information(&self, _define: &Define) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// An error at a location, inside a define, of some kind.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnalysisError<K> {
    location: InstantiatedLocation,
    kind: K,
    define: Statement,
}

impl<K: ErrorKind> AnalysisError<K> {
    /// Builds an error record; `define` is the enclosing define statement.
    #[must_use]
    pub fn create(location: InstantiatedLocation, kind: K, define: &Statement) -> Self {
        debug_assert!(
            matches!(define.kind, StatementKind::Define(_)),
            "analysis errors attach to define statements"
        );
        Self {
            location,
            kind,
            define: define.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &K {
        &self.kind
    }

    #[must_use]
    pub fn location(&self) -> &InstantiatedLocation {
        &self.location
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.location.path
    }

    #[must_use]
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// The deduplication bucket: the location collapsed to its path and
    /// start line.
    #[must_use]
    pub fn key(&self) -> (String, usize) {
        (self.location.path.clone(), self.location.start.line)
    }

    fn define_node(&self) -> &Define {
        match &self.define.kind {
            StatementKind::Define(define) => define,
            _ => unreachable!("checked at construction"),
        }
    }

    /// The enclosing define's name with synthetic wrappers stripped.
    #[must_use]
    pub fn define_name(&self) -> String {
        self.define_node()
            .name_reference()
            .sanitized()
            .to_string()
    }

    /// Renders `"<name> [<code>]: <messages>"`. Without error traces only
    /// the first message is shown; with them, all messages joined by
    /// `separator`.
    #[must_use]
    pub fn description(&self, separator: &str, concise: bool, show_error_traces: bool) -> String {
        let messages = self.kind.messages(concise, self.define_node(), &self.location);
        let message = if show_error_traces {
            messages.join(separator)
        } else {
            messages.into_iter().next().unwrap_or_default()
        };
        format!("{} [{}]: {}", self.kind.name(), self.kind.code(), message)
    }

    /// The structured rendering consumed by hosts and persisted caches.
    #[must_use]
    pub fn to_json(&self, show_error_traces: bool) -> serde_json::Value {
        serde_json::json!({
            "line": self.location.start.line,
            "column": self.location.start.column,
            "path": self.location.path,
            "code": self.kind.code(),
            "name": self.kind.name(),
            "description": self.description(" ", false, show_error_traces),
            "long_description": self.description("\n", false, true),
            "concise_description": self.description("\n", true, show_error_traces),
            "inference": self.kind.inference_information(self.define_node()),
            "define": self.define_name(),
        })
    }
}

impl<K: ErrorKind> PartialEq for AnalysisError<K> {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.code() == other.code() && self.define_name() == other.define_name()
    }
}

impl<K: ErrorKind> Eq for AnalysisError<K> {}

impl<K: ErrorKind> Hash for AnalysisError<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.code().hash(state);
        self.define_name().hash(state);
    }
}

impl<K: ErrorKind> PartialOrd for AnalysisError<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: ErrorKind> Ord for AnalysisError<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location
            .cmp(&other.location)
            .then_with(|| self.code().cmp(&other.code()))
            .then_with(|| self.define_name().cmp(&other.define_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Access, Reference},
        location::{Location, Position},
    };

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct UndefinedName {
        name: String,
    }

    impl ErrorKind for UndefinedName {
        fn code(&self) -> u32 {
            18
        }

        fn name(&self) -> &'static str {
            "Undefined name"
        }

        fn messages(&self, concise: bool, _define: &Define, _location: &InstantiatedLocation) -> Vec<String> {
            if concise {
                vec![format!("`{}` is undefined.", self.name)]
            } else {
                vec![
                    format!("Global name `{}` is not defined.", self.name),
                    "A name is used before an assignment reaches it.".to_owned(),
                ]
            }
        }
    }

    fn define_statement() -> Statement {
        Statement::synthetic(
            Location::point(crate::location::Handle::from_index(0), Position::new(1, 0)),
            StatementKind::Define(Define {
                name: Access::from(Reference::from_dotted("test.$local_test$foo")),
                parameters: Vec::new(),
                body: Vec::new(),
                decorators: Vec::new(),
                return_annotation: None,
                is_async: false,
                parent: None,
                docstring: None,
            }),
        )
    }

    fn error() -> AnalysisError<UndefinedName> {
        AnalysisError::create(
            InstantiatedLocation {
                path: "test.py".to_owned(),
                start: Position::new(4, 2),
                stop: Position::new(4, 7),
            },
            UndefinedName { name: "durp".to_owned() },
            &define_statement(),
        )
    }

    #[test]
    fn description_has_name_code_and_first_message() {
        assert_eq!(
            error().description(" ", false, false),
            "Undefined name [18]: Global name `durp` is not defined."
        );
    }

    #[test]
    fn long_description_joins_all_messages() {
        assert_eq!(
            error().description(" ", false, true),
            "Undefined name [18]: Global name `durp` is not defined. A name is used before an assignment reaches it."
        );
    }

    #[test]
    fn json_rendering_carries_the_sanitized_define() {
        let json = error().to_json(false);
        assert_eq!(json["line"], 4);
        assert_eq!(json["column"], 2);
        assert_eq!(json["path"], "test.py");
        assert_eq!(json["code"], 18);
        assert_eq!(json["define"], "test.foo");
        assert_eq!(json["inference"], serde_json::Value::Null);
    }

    #[test]
    fn key_buckets_by_path_and_line() {
        assert_eq!(error().key(), ("test.py".to_owned(), 4));
    }

    #[test]
    fn errors_round_trip_through_binary_caches() {
        let error = error();
        let bytes = postcard::to_allocvec(&error).expect("serialize");
        let decoded: AnalysisError<UndefinedName> = postcard::from_bytes(&bytes).expect("deserialize");
        assert_eq!(decoded, error);
    }
}
