//! Injected analysis tables: module exports, the class hierarchy, and the
//! per-statement type resolutions the checker publishes.
//!
//! All tables follow the same lifecycle: populated during setup, frozen
//! before analysis, read-only afterwards. The core only performs lookups;
//! writes after [`Environment::freeze`] / [`ModuleExports::freeze`] panic
//! so an out-of-order host shows up immediately instead of racing readers.

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{Access, NodeId, Reference, StatementKind},
    preprocess::classes,
};

/// Export lists of indexed modules, keyed by qualifier.
#[derive(Debug, Default, Clone)]
pub struct ModuleExports {
    exports: AHashMap<Reference, Vec<String>>,
    frozen: bool,
}

impl ModuleExports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, qualifier: Reference, exports: Vec<String>) {
        assert!(!self.frozen, "module-export table is frozen");
        self.exports.insert(qualifier, exports);
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Returns `None` when the module has not been indexed.
    #[must_use]
    pub fn get(&self, qualifier: &Reference) -> Option<&[String]> {
        self.exports.get(qualifier).map(Vec::as_slice)
    }
}

/// The callable kind of a signature element. Named callables carry the
/// fully-qualified name used as a call-graph vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallableKind {
    Named(Reference),
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callable {
    pub kind: CallableKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub callable: Callable,
}

/// The result of walking an access against the published resolutions: the
/// type of the access chain's terminal element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Signature(Signature),
    /// A non-callable (or unresolved) terminal.
    Value,
}

impl Element {
    /// A signature element dispatching to the named callable.
    #[must_use]
    pub fn named(qualified_name: &str) -> Self {
        Self::Signature(Signature {
            callable: Callable {
                kind: CallableKind::Named(Reference::from_dotted(qualified_name)),
            },
        })
    }

    /// A signature element with no stable name (lambdas and friends).
    #[must_use]
    pub fn anonymous() -> Self {
        Self::Signature(Signature {
            callable: Callable {
                kind: CallableKind::Anonymous,
            },
        })
    }
}

/// The access→type map the checker recorded for one statement of one
/// define, keyed by the rendered access.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    annotations: &'a AHashMap<String, Element>,
}

impl Resolution<'_> {
    /// The type of the last element of `access`; [`Element::Value`] when
    /// the checker recorded nothing for it.
    #[must_use]
    pub fn last_element(&self, access: &Access) -> Element {
        self.annotations
            .get(&access.to_string())
            .cloned()
            .unwrap_or(Element::Value)
    }
}

/// The analysis environment consumed by the call-graph engine: class
/// hierarchy, per-class method names, and the resolution store keyed by
/// `(define node id, statement index)`.
#[derive(Debug, Default)]
pub struct Environment {
    subclasses: AHashMap<Reference, Vec<Reference>>,
    methods: AHashMap<Reference, AHashSet<String>>,
    resolutions: AHashMap<(NodeId, usize), AHashMap<String, Element>>,
    frozen: bool,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the class hierarchy and method tables of a normalized
    /// source. Base accesses must already be qualified, so this runs after
    /// preprocessing.
    pub fn index_source(&mut self, source: &crate::ast::Source) {
        assert!(!self.frozen, "environment is frozen");
        for statement in classes(source) {
            let Some(class) = statement.as_class() else {
                continue;
            };
            let Some(class_name) = class.name.as_reference() else {
                continue;
            };
            let methods = self.methods.entry(class_name.clone()).or_default();
            for body_statement in &class.body {
                if let StatementKind::Define(define) = &body_statement.kind
                    && let Some(method) = define.name_reference().last()
                {
                    methods.insert(method.to_owned());
                }
            }
            for base in &class.bases {
                if base.name.is_some() {
                    continue;
                }
                let Some(base_name) = base.value.access().and_then(Access::as_reference) else {
                    continue;
                };
                let subclasses = self.subclasses.entry(base_name).or_default();
                if !subclasses.contains(&class_name) {
                    subclasses.push(class_name.clone());
                }
            }
        }
    }

    /// Publishes the checker's access→type map for one statement.
    pub fn add_resolution(
        &mut self,
        define_id: NodeId,
        statement_key: usize,
        access: impl Into<String>,
        element: Element,
    ) {
        assert!(!self.frozen, "environment is frozen");
        self.resolutions
            .entry((define_id, statement_key))
            .or_default()
            .insert(access.into(), element);
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn resolution(&self, define_id: NodeId, statement_key: usize) -> Option<Resolution<'_>> {
        self.resolutions
            .get(&(define_id, statement_key))
            .map(|annotations| Resolution { annotations })
    }

    /// Direct subclasses of `class`, in registration order.
    #[must_use]
    pub fn subclasses_of(&self, class: &Reference) -> &[Reference] {
        self.subclasses.get(class).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn class_defines_method(&self, class: &Reference, method: &str) -> bool {
        self.methods
            .get(class)
            .is_some_and(|methods| methods.contains(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_accesses_are_values() {
        let mut environment = Environment::new();
        environment.add_resolution(NodeId(1), 0, "f()", Element::named("module.f"));
        environment.freeze();

        let resolution = environment.resolution(NodeId(1), 0).expect("resolution");
        let recorded = Access::Simple(vec![
            crate::ast::AccessElement::identifier("f"),
            crate::ast::AccessElement::Call(crate::ast::CallElement {
                location: crate::location::Location::default(),
                arguments: Vec::new(),
            }),
        ]);
        assert_eq!(resolution.last_element(&recorded), Element::named("module.f"));
        let unknown = Access::name("g");
        assert_eq!(resolution.last_element(&unknown), Element::Value);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn frozen_environment_rejects_writes() {
        let mut environment = Environment::new();
        environment.freeze();
        environment.add_resolution(NodeId(1), 0, "f()", Element::Value);
    }
}
