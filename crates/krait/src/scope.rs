//! Lexical scope state threaded through qualification.
//!
//! A scope is built per enclosing lexical block and discarded at block exit.
//! Branching statements clone the scope per branch and join the results;
//! on alias collisions the first branch wins (body over orelse, earlier
//! handler over later).

use ahash::{AHashMap, AHashSet};

use crate::{ast::Reference, location::Location};

/// The canonical form a name rewrites to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Replacement for the aliased head.
    pub access: Reference,
    /// Qualifier of the scope that installed the alias.
    pub qualifier: Reference,
    /// Whether the binding is a forward declaration: a class, define, or
    /// `_SpecialForm` assignment introduced later in the same block.
    pub is_forward_reference: bool,
}

/// Scope of one lexical block during qualification.
#[derive(Debug, Clone)]
pub struct Scope {
    pub qualifier: Reference,
    pub aliases: AHashMap<Reference, Alias>,
    /// Names that must not be rebound as locals (`global` declarations).
    pub immutables: AHashSet<Reference>,
    pub locals: AHashSet<Reference>,
    /// Whether forward-reference aliases are honored. True at the top level
    /// and inside decorators and annotations, false inside function bodies.
    pub use_forward_references: bool,
    pub is_top_level: bool,
    /// Locations whose expressions are exempt from qualification
    /// (accessor decorators and friends).
    pub skip: AHashSet<Location>,
}

impl Scope {
    /// The root scope of a source.
    #[must_use]
    pub fn top_level(qualifier: Reference) -> Self {
        Self {
            qualifier,
            aliases: AHashMap::new(),
            immutables: AHashSet::new(),
            locals: AHashSet::new(),
            use_forward_references: true,
            is_top_level: true,
            skip: AHashSet::new(),
        }
    }

    /// A nested block scope inheriting the surrounding bindings. Locals
    /// start fresh; the inherited aliases keep outer names resolvable.
    #[must_use]
    pub fn nested(&self, qualifier: Reference, use_forward_references: bool) -> Self {
        Self {
            qualifier,
            aliases: self.aliases.clone(),
            immutables: self.immutables.clone(),
            locals: AHashSet::new(),
            use_forward_references,
            is_top_level: false,
            skip: self.skip.clone(),
        }
    }

    #[must_use]
    pub fn alias_of(&self, name: &str) -> Option<&Alias> {
        self.aliases.get(&Reference::single(name.to_owned()))
    }

    /// Installs an alias for a single name.
    pub fn bind(&mut self, name: &str, alias: Alias) {
        self.aliases.insert(Reference::single(name.to_owned()), alias);
    }

    /// Joins the scopes of sibling branches; `self` (the first branch) wins
    /// on alias collisions.
    #[must_use]
    pub fn join(mut self, branches: Vec<Self>) -> Self {
        for branch in branches {
            for (name, alias) in branch.aliases {
                self.aliases.entry(name).or_insert(alias);
            }
            self.locals.extend(branch.locals);
            self.immutables.extend(branch.immutables);
            self.skip.extend(branch.skip);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(target: &str) -> Alias {
        Alias {
            access: Reference::from_dotted(target),
            qualifier: Reference::empty(),
            is_forward_reference: false,
        }
    }

    #[test]
    fn join_prefers_the_first_branch() {
        let base = Scope::top_level(Reference::from_dotted("module"));
        let mut body = base.clone();
        body.bind("x", alias("module.first"));
        let mut orelse = base.clone();
        orelse.bind("x", alias("module.second"));
        orelse.bind("y", alias("module.other"));

        let joined = body.join(vec![orelse]);
        assert_eq!(joined.alias_of("x").unwrap().access, Reference::from_dotted("module.first"));
        assert_eq!(joined.alias_of("y").unwrap().access, Reference::from_dotted("module.other"));
    }
}
