//! The inter-procedural call graph: caller→callee edges resolved through
//! the checker's published types, the method-override map, and the
//! strongly-connected-component partition used for fixpoint scheduling.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{
        Access, AccessElement, Assign, Comprehension, DictionaryEntry, Expression, ExpressionKind, For, Handler, If,
        Reference, Source, Starred, Statement, StatementKind, StringKind, Try, While, With,
    },
    environment::{CallableKind, Element, Environment},
    preprocess::{classes, defines},
};

/// Caller→callees edges over fully-qualified define names. Duplicate call
/// sites collapse to one edge per (caller, callee) pair; insertion order is
/// preserved for deterministic partitioning.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallGraph {
    edges: IndexMap<Reference, IndexSet<Reference>>,
}

impl CallGraph {
    /// Builds the call graph of a normalized source.
    ///
    /// For every define, every access terminating in a call is resolved
    /// through the environment's `(node id, statement index)` store; a
    /// signature element with a named callable records an edge. The
    /// statement enumeration is [`statement_keys`] — the checker publishes
    /// under the same keys.
    #[must_use]
    pub fn create(environment: &Environment, source: &Source) -> Self {
        let mut graph = Self::default();
        for statement in defines(source, true, true, false) {
            let Some(define) = statement.as_define() else {
                continue;
            };
            let caller = define.name_reference();
            for (key, body_statement) in statement_keys(&define.body) {
                let Some(resolution) = environment.resolution(statement.id, key) else {
                    continue;
                };
                let mut call_sites = Vec::new();
                for expression in statement_expressions(body_statement) {
                    collect_call_sites(expression, &mut call_sites);
                }
                for access in call_sites {
                    if let Element::Signature(signature) = resolution.last_element(access)
                        && let CallableKind::Named(callee) = signature.callable.kind
                    {
                        graph.add_edge(caller.clone(), callee);
                    }
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, caller: Reference, callee: Reference) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    #[must_use]
    pub fn edges(&self) -> &IndexMap<Reference, IndexSet<Reference>> {
        &self.edges
    }

    #[must_use]
    pub fn callees(&self, caller: &Reference) -> Vec<Reference> {
        self.edges
            .get(caller)
            .map(|callees| callees.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// SCC partition of this graph's edges; see [`partition`].
    #[must_use]
    pub fn partition(&self) -> Vec<Vec<Reference>> {
        partition(&self.edges)
    }
}

/// Pre-order enumeration of the statements of a define body, nested blocks
/// included, nested defines and classes excluded (those are checked under
/// their own node ids). This is the single definition of the statement
/// keys shared with the resolution store.
#[must_use]
pub fn statement_keys(body: &[Statement]) -> Vec<(usize, &Statement)> {
    fn walk<'a>(statements: &'a [Statement], counter: &mut usize, keys: &mut Vec<(usize, &'a Statement)>) {
        for statement in statements {
            keys.push((*counter, statement));
            *counter += 1;
            match &statement.kind {
                StatementKind::For(For { body, orelse, .. })
                | StatementKind::If(If { body, orelse, .. })
                | StatementKind::While(While { body, orelse, .. }) => {
                    walk(body, counter, keys);
                    walk(orelse, counter, keys);
                }
                StatementKind::With(With { body, .. }) => walk(body, counter, keys),
                StatementKind::Try(Try {
                    body,
                    handlers,
                    orelse,
                    finally,
                }) => {
                    walk(body, counter, keys);
                    for handler in handlers {
                        walk(&handler.body, counter, keys);
                    }
                    walk(orelse, counter, keys);
                    walk(finally, counter, keys);
                }
                _ => {}
            }
        }
    }
    let mut keys = Vec::new();
    let mut counter = 0;
    walk(body, &mut counter, &mut keys);
    keys
}

/// The expressions owned directly by a statement (nested statements have
/// their own keys and report their own expressions).
fn statement_expressions(statement: &Statement) -> Vec<&Expression> {
    match &statement.kind {
        StatementKind::Assign(Assign {
            target,
            annotation,
            value,
            ..
        }) => {
            let mut expressions = vec![target];
            expressions.extend(annotation.as_ref());
            expressions.extend(value.as_ref());
            expressions
        }
        StatementKind::Assert { test, message } => {
            let mut expressions = vec![test];
            expressions.extend(message.as_ref());
            expressions
        }
        StatementKind::Delete(targets) => targets.iter().collect(),
        StatementKind::Expression(expression)
        | StatementKind::Yield(expression)
        | StatementKind::YieldFrom(expression) => vec![expression],
        StatementKind::For(For { target, iterator, .. }) => vec![target, iterator],
        StatementKind::If(If { test, .. }) | StatementKind::While(While { test, .. }) => vec![test],
        StatementKind::Raise(expression) => expression.iter().collect(),
        StatementKind::Return { expression, .. } => expression.iter().collect(),
        StatementKind::Try(Try { handlers, .. }) => handlers
            .iter()
            .filter_map(|handler: &Handler| handler.kind.as_ref())
            .collect(),
        StatementKind::With(With { items, .. }) => {
            let mut expressions = Vec::with_capacity(items.len() * 2);
            for (context, target) in items {
                expressions.push(context);
                expressions.extend(target.as_ref());
            }
            expressions
        }
        _ => Vec::new(),
    }
}

/// Collects every access in the expression tree whose chain terminates in a
/// call.
fn collect_call_sites<'a>(expression: &'a Expression, call_sites: &mut Vec<&'a Access>) {
    match &expression.kind {
        ExpressionKind::Access(access) => {
            if access.is_call() {
                call_sites.push(access);
            }
            match access {
                Access::Simple(elements) => collect_from_elements(elements, call_sites),
                Access::Expression(expression_access) => {
                    collect_call_sites(&expression_access.expression, call_sites);
                    collect_from_elements(&expression_access.access, call_sites);
                }
            }
        }
        ExpressionKind::Await(inner) | ExpressionKind::UnaryOperator { operand: inner, .. } => {
            collect_call_sites(inner, call_sites);
        }
        ExpressionKind::BooleanOperator { left, right, .. } => {
            collect_call_sites(left, call_sites);
            collect_call_sites(right, call_sites);
        }
        ExpressionKind::ComparisonOperator { left, comparisons } => {
            collect_call_sites(left, call_sites);
            for (_, right) in comparisons {
                collect_call_sites(right, call_sites);
            }
        }
        ExpressionKind::Dictionary(entries) => {
            for entry in entries {
                match entry {
                    DictionaryEntry::Pair { key, value } => {
                        collect_call_sites(key, call_sites);
                        collect_call_sites(value, call_sites);
                    }
                    DictionaryEntry::Unpack(mapping) => collect_call_sites(mapping, call_sites),
                }
            }
        }
        ExpressionKind::DictionaryComprehension { key, value, generators } => {
            collect_call_sites(key, call_sites);
            collect_call_sites(value, call_sites);
            collect_from_generators(generators, call_sites);
        }
        ExpressionKind::Generator { element, generators }
        | ExpressionKind::ListComprehension { element, generators }
        | ExpressionKind::SetComprehension { element, generators } => {
            collect_call_sites(element, call_sites);
            collect_from_generators(generators, call_sites);
        }
        ExpressionKind::Lambda { body, .. } => collect_call_sites(body, call_sites),
        ExpressionKind::List(items) | ExpressionKind::Set(items) | ExpressionKind::Tuple(items) => {
            for item in items {
                collect_call_sites(item, call_sites);
            }
        }
        ExpressionKind::Starred(Starred::Once(inner) | Starred::Twice(inner)) => {
            collect_call_sites(inner, call_sites);
        }
        ExpressionKind::String(literal) => {
            if let StringKind::Format(expressions) = &literal.kind {
                for fragment in expressions {
                    collect_call_sites(fragment, call_sites);
                }
            }
        }
        ExpressionKind::Ternary {
            target,
            test,
            alternative,
        } => {
            collect_call_sites(target, call_sites);
            collect_call_sites(test, call_sites);
            collect_call_sites(alternative, call_sites);
        }
        ExpressionKind::Yield(inner) => {
            if let Some(inner) = inner {
                collect_call_sites(inner, call_sites);
            }
        }
        _ => {}
    }
}

fn collect_from_elements<'a>(elements: &'a [AccessElement], call_sites: &mut Vec<&'a Access>) {
    for element in elements {
        if let AccessElement::Call(call) = element {
            for argument in &call.arguments {
                collect_call_sites(&argument.value, call_sites);
            }
        }
    }
}

fn collect_from_generators<'a>(generators: &'a [Comprehension], call_sites: &mut Vec<&'a Access>) {
    for generator in generators {
        collect_call_sites(&generator.target, call_sites);
        collect_call_sites(&generator.iterator, call_sites);
        for condition in &generator.conditions {
            collect_call_sites(condition, call_sites);
        }
    }
}

/// Tarjan SCCs of the call graph, emitted callers before callees: no edge
/// points from a later component to an earlier one. Members within a
/// component follow the discovery walk.
#[must_use]
pub fn partition(edges: &IndexMap<Reference, IndexSet<Reference>>) -> Vec<Vec<Reference>> {
    let mut vertices: IndexSet<&Reference> = IndexSet::new();
    for (caller, callees) in edges {
        vertices.insert(caller);
        for callee in callees {
            vertices.insert(callee);
        }
    }

    let mut state = Tarjan {
        edges,
        index: AHashMap::new(),
        lowlink: AHashMap::new(),
        on_stack: IndexSet::new(),
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    // Tarjan pops callees before their callers; walking the vertices
    // newest-first and reversing the pops yields the callers-first order.
    for vertex in vertices.iter().rev() {
        if !state.index.contains_key(*vertex) {
            state.connect(*vertex);
        }
    }
    state.components.reverse();
    state.components
}

struct Tarjan<'a> {
    edges: &'a IndexMap<Reference, IndexSet<Reference>>,
    index: AHashMap<&'a Reference, usize>,
    lowlink: AHashMap<&'a Reference, usize>,
    on_stack: IndexSet<&'a Reference>,
    stack: Vec<&'a Reference>,
    next_index: usize,
    components: Vec<Vec<Reference>>,
}

impl<'a> Tarjan<'a> {
    fn connect(&mut self, vertex: &'a Reference) {
        self.index.insert(vertex, self.next_index);
        self.lowlink.insert(vertex, self.next_index);
        self.next_index += 1;
        self.stack.push(vertex);
        self.on_stack.insert(vertex);

        if let Some(callees) = self.edges.get(vertex) {
            for callee in callees {
                if !self.index.contains_key(callee) {
                    self.connect(callee);
                    let low = self.lowlink[callee].min(self.lowlink[vertex]);
                    self.lowlink.insert(vertex, low);
                } else if self.on_stack.contains(callee) {
                    let low = self.index[callee].min(self.lowlink[vertex]);
                    self.lowlink.insert(vertex, low);
                }
            }
        }

        if self.lowlink[vertex] == self.index[vertex] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.swap_remove(member);
                component.push(member.clone());
                if member == vertex {
                    break;
                }
            }
            component.reverse();
            self.components.push(component);
        }
    }
}

/// The override map of a source: for every method `C.m`, the overrides in
/// the nearest subclasses that redefine `m`. Transitive overrides surface
/// through their immediate parents.
#[must_use]
pub fn overrides_of_source(environment: &Environment, source: &Source) -> IndexMap<Reference, Vec<Reference>> {
    let mut overrides = IndexMap::new();
    for statement in classes(source) {
        let Some(class) = statement.as_class() else {
            continue;
        };
        let Some(class_name) = class.name.as_reference() else {
            continue;
        };
        for body_statement in &class.body {
            let StatementKind::Define(define) = &body_statement.kind else {
                continue;
            };
            let Some(method) = define.name_reference().last().map(str::to_owned) else {
                continue;
            };
            let mut overriding = Vec::new();
            collect_direct_overrides(environment, &class_name, &method, &mut overriding);
            if !overriding.is_empty() {
                overrides.insert(
                    class_name.child(method.clone()),
                    overriding
                        .into_iter()
                        .map(|subclass| subclass.child(method.clone()))
                        .collect(),
                );
            }
        }
    }
    overrides
}

fn collect_direct_overrides(
    environment: &Environment,
    class: &Reference,
    method: &str,
    overriding: &mut Vec<Reference>,
) {
    for subclass in environment.subclasses_of(class) {
        if environment.class_defines_method(subclass, method) {
            overriding.push(subclass.clone());
        } else {
            collect_direct_overrides(environment, subclass, method, overriding);
        }
    }
}
