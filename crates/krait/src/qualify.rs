//! The qualification pass: every name in the output is fully qualified,
//! synthetic (`$local_…$`, `$parameter$…`, `$target$…`), or left alone as a
//! built-in or unbound name.
//!
//! Each block is processed in two phases. The *explore* phase walks the
//! block's direct children — recursing into structural statements but not
//! into nested defines or classes — and registers forward aliases for every
//! `class X`, `def X`, and `X: _SpecialForm = …`, plus `global` names into
//! the immutable set. The *qualify* phase then folds left-to-right; each
//! statement may mutate the scope seen by the statements after it.

use crate::{
    ast::{
        Access, AccessElement, Assign, CallArgument, CallElement, Class, Comprehension, Define, DictionaryEntry,
        Expression, ExpressionAccess, ExpressionKind, For, Handler, If, Import, Parameter, Reference, Source, Starred,
        Statement, StatementKind, StringKind, StringLiteral, Try, While, With, sanitize_identifier,
    },
    location::Handle,
    parse::Parse,
    scope::{Alias, Scope},
    tracer::PipelineTracer,
};

/// Rewrites `source` so every identifier is canonical. See the module
/// documentation for the naming scheme.
pub fn qualify<T: PipelineTracer>(source: Source, parser: &dyn Parse, tracer: &mut T) -> Source {
    let mut qualifier = Qualify {
        parser,
        tracer,
        handle: source.handle,
    };
    let scope = Scope::top_level(source.qualifier.clone());
    let (_, statements) = qualifier.qualify_statements(scope, source.statements.clone(), false);
    source.with_statements(statements)
}

/// The local-name wrapper: dots of the qualifier collapse to `?` so the
/// synthetic stays a single identifier.
#[must_use]
pub fn local_identifier(qualifier: &Reference, name: &str) -> String {
    format!("$local_{}${}", qualifier.to_string().replace('.', "?"), name)
}

struct Qualify<'q, T: PipelineTracer> {
    parser: &'q dyn Parse,
    tracer: &'q mut T,
    handle: Handle,
}

impl<T: PipelineTracer> Qualify<'_, T> {
    fn qualify_statements(
        &mut self,
        mut scope: Scope,
        statements: Vec<Statement>,
        qualify_assign: bool,
    ) -> (Scope, Vec<Statement>) {
        explore_block(&mut scope, &statements);
        let mut qualified = Vec::with_capacity(statements.len());
        for statement in statements {
            let (next, statement) = self.qualify_statement(scope, statement, qualify_assign);
            scope = next;
            qualified.push(statement);
        }
        (scope, qualified)
    }

    fn qualify_statement(&mut self, scope: Scope, statement: Statement, qualify_assign: bool) -> (Scope, Statement) {
        match statement.kind.clone() {
            StatementKind::Assign(assign) => {
                let (scope, assign) = self.qualify_assign(scope, assign, qualify_assign);
                (scope, statement.with_kind(StatementKind::Assign(assign)))
            }
            StatementKind::Assert { test, message } => {
                let kind = StatementKind::Assert {
                    test: self.qualify_expression(&scope, test, false),
                    message: message.map(|message| self.qualify_expression(&scope, message, false)),
                };
                (scope, statement.with_kind(kind))
            }
            StatementKind::Class(class) => {
                let (scope, class) = self.qualify_class(scope, class);
                (scope, statement.with_kind(StatementKind::Class(class)))
            }
            StatementKind::Define(define) => {
                let (scope, define) = self.qualify_define(scope, define, qualify_assign);
                (scope, statement.with_kind(StatementKind::Define(define)))
            }
            StatementKind::Delete(targets) => {
                let targets = targets
                    .into_iter()
                    .map(|target| self.qualify_expression(&scope, target, false))
                    .collect();
                (scope, statement.with_kind(StatementKind::Delete(targets)))
            }
            StatementKind::Expression(expression) => {
                let expression = self.qualify_expression(&scope, expression, false);
                (scope, statement.with_kind(StatementKind::Expression(expression)))
            }
            StatementKind::For(for_statement) => {
                let iterator = self.qualify_expression(&scope, for_statement.iterator, false);
                let (bound, target) = self.qualify_target(scope, for_statement.target, qualify_assign);
                let (body_scope, body) = self.qualify_statements(bound.clone(), for_statement.body, qualify_assign);
                let (orelse_scope, orelse) = self.qualify_statements(bound, for_statement.orelse, qualify_assign);
                let scope = body_scope.join(vec![orelse_scope]);
                let kind = StatementKind::For(For {
                    target,
                    iterator,
                    body,
                    orelse,
                    is_async: for_statement.is_async,
                });
                (scope, statement.with_kind(kind))
            }
            StatementKind::If(if_statement) => {
                let test = self.qualify_expression(&scope, if_statement.test, false);
                let (body_scope, body) = self.qualify_statements(scope.clone(), if_statement.body, qualify_assign);
                let (orelse_scope, orelse) = self.qualify_statements(scope, if_statement.orelse, qualify_assign);
                let scope = body_scope.join(vec![orelse_scope]);
                (scope, statement.with_kind(StatementKind::If(If { test, body, orelse })))
            }
            StatementKind::Import(import) => {
                let scope = install_import_aliases(scope, &import);
                (scope, statement.with_kind(StatementKind::Import(import)))
            }
            StatementKind::Raise(expression) => {
                let expression = expression.map(|expression| self.qualify_expression(&scope, expression, false));
                (scope, statement.with_kind(StatementKind::Raise(expression)))
            }
            StatementKind::Return {
                expression,
                is_implicit,
            } => {
                let kind = StatementKind::Return {
                    expression: expression.map(|expression| self.qualify_expression(&scope, expression, false)),
                    is_implicit,
                };
                (scope, statement.with_kind(kind))
            }
            StatementKind::Try(try_statement) => {
                let (body_scope, body) = self.qualify_statements(scope.clone(), try_statement.body, qualify_assign);
                let mut handler_scopes = Vec::with_capacity(try_statement.handlers.len());
                let mut handlers = Vec::with_capacity(try_statement.handlers.len());
                for handler in try_statement.handlers {
                    let (handler_scope, handler) = self.qualify_handler(scope.clone(), handler, qualify_assign);
                    handler_scopes.push(handler_scope);
                    handlers.push(handler);
                }
                let (orelse_scope, orelse) = self.qualify_statements(scope.clone(), try_statement.orelse, qualify_assign);
                let (finally_scope, finally) = self.qualify_statements(scope, try_statement.finally, qualify_assign);
                handler_scopes.push(orelse_scope);
                handler_scopes.push(finally_scope);
                let scope = body_scope.join(handler_scopes);
                let kind = StatementKind::Try(Try {
                    body,
                    handlers,
                    orelse,
                    finally,
                });
                (scope, statement.with_kind(kind))
            }
            StatementKind::While(while_statement) => {
                let test = self.qualify_expression(&scope, while_statement.test, false);
                let (body_scope, body) = self.qualify_statements(scope.clone(), while_statement.body, qualify_assign);
                let (orelse_scope, orelse) = self.qualify_statements(scope, while_statement.orelse, qualify_assign);
                let scope = body_scope.join(vec![orelse_scope]);
                (scope, statement.with_kind(StatementKind::While(While { test, body, orelse })))
            }
            StatementKind::With(with_statement) => {
                let mut scope = scope;
                let mut items = Vec::with_capacity(with_statement.items.len());
                for (context, target) in with_statement.items {
                    let context = self.qualify_expression(&scope, context, false);
                    let target = match target {
                        Some(target) => {
                            let (bound, target) = self.qualify_target(scope, target, qualify_assign);
                            scope = bound;
                            Some(target)
                        }
                        None => None,
                    };
                    items.push((context, target));
                }
                let (scope, body) = self.qualify_statements(scope, with_statement.body, qualify_assign);
                let kind = StatementKind::With(With {
                    items,
                    body,
                    is_async: with_statement.is_async,
                });
                (scope, statement.with_kind(kind))
            }
            StatementKind::Yield(expression) => {
                let expression = self.qualify_expression(&scope, expression, false);
                (scope, statement.with_kind(StatementKind::Yield(expression)))
            }
            StatementKind::YieldFrom(expression) => {
                let expression = self.qualify_expression(&scope, expression, false);
                (scope, statement.with_kind(StatementKind::YieldFrom(expression)))
            }
            StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Global(_)
            | StatementKind::Nonlocal(_)
            | StatementKind::Pass => (scope, statement),
        }
    }

    fn qualify_assign(&mut self, scope: Scope, assign: Assign, qualify_assign: bool) -> (Scope, Assign) {
        // The value reads the scope as it was before the target binds.
        let value = assign.value.map(|value| self.qualify_expression(&scope, value, false));
        let (scope, target) = self.qualify_target(scope, assign.target, qualify_assign);
        let annotation = assign
            .annotation
            .map(|annotation| self.qualify_annotation(&scope, annotation));
        let parent = if qualify_assign {
            Some(scope.qualifier.clone())
        } else {
            assign.parent
        };
        (
            scope,
            Assign {
                target,
                annotation,
                value,
                parent,
            },
        )
    }

    fn qualify_handler(&mut self, scope: Scope, handler: Handler, qualify_assign: bool) -> (Scope, Handler) {
        let kind = handler.kind.map(|kind| self.qualify_expression(&scope, kind, false));
        let mut scope = scope;
        let name = handler.name.map(|name| {
            let renamed = format!("$target${name}");
            scope.bind(
                &name,
                Alias {
                    access: Reference::single(renamed.clone()),
                    qualifier: scope.qualifier.clone(),
                    is_forward_reference: false,
                },
            );
            renamed
        });
        let (scope, body) = self.qualify_statements(scope, handler.body, qualify_assign);
        (scope, Handler { kind, name, body })
    }

    fn qualify_class(&mut self, mut scope: Scope, class: Class) -> (Scope, Class) {
        let decorators = self.qualify_decorators(&mut scope, class.decorators);
        let (bare, name) = promote_name(&scope, &class.name);
        if let Some(bare) = &bare {
            scope.bind(
                bare,
                Alias {
                    access: scope.qualifier.child(bare.clone()),
                    qualifier: scope.qualifier.clone(),
                    is_forward_reference: false,
                },
            );
        }
        let bases = class
            .bases
            .into_iter()
            .map(|base| CallArgument {
                name: base.name,
                value: self.qualify_expression(&scope, base.value, false),
            })
            .collect();
        let class_qualifier = name.as_reference().unwrap_or_else(|| scope.qualifier.clone());
        let body_scope = scope.nested(class_qualifier, true);
        let (_, body) = self.qualify_statements(body_scope, class.body, true);
        (
            scope,
            Class {
                name,
                bases,
                body,
                decorators,
                docstring: class.docstring,
            },
        )
    }

    fn qualify_define(&mut self, mut scope: Scope, define: Define, qualify_assign: bool) -> (Scope, Define) {
        let decorators = self.qualify_decorators(&mut scope, define.decorators);
        let (bare, name) = promote_name(&scope, &define.name);
        if let Some(bare) = &bare {
            scope.bind(
                bare,
                Alias {
                    access: scope.qualifier.child(bare.clone()),
                    qualifier: scope.qualifier.clone(),
                    is_forward_reference: false,
                },
            );
        }
        let parent = if qualify_assign {
            Some(scope.qualifier.clone())
        } else {
            define.parent
        };
        let return_annotation = define
            .return_annotation
            .map(|annotation| self.qualify_annotation(&scope, annotation));

        let body_qualifier = name.as_reference().unwrap_or_else(|| scope.qualifier.clone());
        let mut body_scope = scope.nested(body_qualifier, false);
        let parameters = self.qualify_parameters(&scope, &mut body_scope, define.parameters);
        let (_, body) = self.qualify_statements(body_scope, define.body, false);

        (
            scope,
            Define {
                name,
                parameters,
                body,
                decorators,
                return_annotation,
                is_async: define.is_async,
                parent,
                docstring: define.docstring,
            },
        )
    }

    /// Renames parameters to `$parameter$<name>` (star prefixes preserved)
    /// and installs the matching aliases into the body scope. Annotations
    /// qualify in the enclosing scope with string re-parsing; default values
    /// qualify in the enclosing scope without it.
    fn qualify_parameters(
        &mut self,
        scope: &Scope,
        body_scope: &mut Scope,
        parameters: Vec<Parameter>,
    ) -> Vec<Parameter> {
        parameters
            .into_iter()
            .map(|parameter| {
                let (stars, base) = split_stars(&parameter.name);
                let renamed = if base.starts_with('$') {
                    parameter.name.clone()
                } else {
                    body_scope.bind(
                        base,
                        Alias {
                            access: Reference::single(format!("$parameter${base}")),
                            qualifier: body_scope.qualifier.clone(),
                            is_forward_reference: false,
                        },
                    );
                    format!("{stars}$parameter${base}")
                };
                Parameter {
                    location: parameter.location,
                    name: renamed,
                    value: parameter.value.map(|value| self.qualify_expression(scope, value, false)),
                    annotation: parameter
                        .annotation
                        .map(|annotation| self.qualify_annotation(scope, annotation)),
                }
            })
            .collect()
    }

    /// Decorators qualify with forward references honored. The accessor
    /// decorators (`staticmethod`, `classmethod`, `property`, `*.getter`,
    /// `*.setter`, `*.deleter`) go into the scope's skip-set and pass
    /// through untouched.
    fn qualify_decorators(&mut self, scope: &mut Scope, decorators: Vec<Expression>) -> Vec<Expression> {
        for decorator in &decorators {
            if is_accessor_decorator(decorator) {
                scope.skip.insert(decorator.location);
            }
        }
        let mut decorator_scope = scope.clone();
        decorator_scope.use_forward_references = true;
        decorators
            .into_iter()
            .map(|decorator| self.qualify_expression_inner(&decorator_scope, decorator, false, true))
            .collect()
    }

    fn qualify_annotation(&mut self, scope: &Scope, annotation: Expression) -> Expression {
        let mut annotation_scope = scope.clone();
        annotation_scope.use_forward_references = true;
        self.qualify_expression_inner(&annotation_scope, annotation, true, false)
    }

    /// Binds assignment targets. Bare identifiers become locals (or class
    /// attributes under `qualify_assign`); tuple and list patterns recurse;
    /// attribute targets qualify without binding.
    fn qualify_target(&mut self, scope: Scope, target: Expression, qualify_assign: bool) -> (Scope, Expression) {
        match target.kind.clone() {
            ExpressionKind::Tuple(items) => {
                let mut scope = scope;
                let mut qualified = Vec::with_capacity(items.len());
                for item in items {
                    let (next, item) = self.qualify_target(scope, item, qualify_assign);
                    scope = next;
                    qualified.push(item);
                }
                (scope, target.with_kind(ExpressionKind::Tuple(qualified)))
            }
            ExpressionKind::List(items) => {
                let mut scope = scope;
                let mut qualified = Vec::with_capacity(items.len());
                for item in items {
                    let (next, item) = self.qualify_target(scope, item, qualify_assign);
                    scope = next;
                    qualified.push(item);
                }
                (scope, target.with_kind(ExpressionKind::List(qualified)))
            }
            ExpressionKind::Starred(Starred::Once(inner)) => {
                let (scope, inner) = self.qualify_target(scope, *inner, qualify_assign);
                (
                    scope,
                    target.with_kind(ExpressionKind::Starred(Starred::Once(Box::new(inner)))),
                )
            }
            ExpressionKind::Access(Access::Simple(elements)) if elements.len() == 1 => {
                let Some(name) = elements[0].as_identifier().map(str::to_owned) else {
                    let expression = self.qualify_expression(&scope, target.clone(), false);
                    return (scope, expression);
                };
                self.bind_target_identifier(scope, target, &name, qualify_assign)
            }
            _ => {
                let expression = self.qualify_expression(&scope, target.clone(), false);
                (scope, expression)
            }
        }
    }

    fn bind_target_identifier(
        &mut self,
        mut scope: Scope,
        target: Expression,
        name: &str,
        qualify_assign: bool,
    ) -> (Scope, Expression) {
        let key = Reference::single(name.to_owned());
        if qualify_assign {
            // Class body: the bare name becomes a dotted class attribute,
            // sanitized by dropping its leading underscores.
            let attribute = scope.qualifier.child(strip_leading_underscores(name));
            scope.bind(
                name,
                Alias {
                    access: attribute.clone(),
                    qualifier: scope.qualifier.clone(),
                    is_forward_reference: false,
                },
            );
            let expression = target.with_kind(ExpressionKind::Access(attribute.into()));
            return (scope, expression);
        }
        if name.starts_with('$') {
            return (scope, target);
        }
        if scope.immutables.contains(&key) {
            let expression = self.qualify_expression(&scope, target.clone(), false);
            return (scope, expression);
        }
        if scope.locals.contains(&key) {
            let expression = self.qualify_expression(&scope, target.clone(), false);
            return (scope, expression);
        }
        let renamed = local_identifier(&scope.qualifier, name);
        scope.bind(
            name,
            Alias {
                access: Reference::single(renamed.clone()),
                qualifier: scope.qualifier.clone(),
                is_forward_reference: false,
            },
        );
        scope.locals.insert(key);
        let expression = target.with_kind(ExpressionKind::Access(Access::name(renamed)));
        (scope, expression)
    }

    fn qualify_expression(&mut self, scope: &Scope, expression: Expression, qualify_strings: bool) -> Expression {
        self.qualify_expression_inner(scope, expression, qualify_strings, false)
    }

    fn qualify_expression_inner(
        &mut self,
        scope: &Scope,
        expression: Expression,
        qualify_strings: bool,
        suppress_synthetics: bool,
    ) -> Expression {
        if scope.skip.contains(&expression.location) {
            return expression;
        }
        let kind = match expression.kind.clone() {
            ExpressionKind::Access(access) => ExpressionKind::Access(self.qualify_access(
                scope,
                access,
                qualify_strings,
                suppress_synthetics,
            )),
            ExpressionKind::Await(inner) => {
                ExpressionKind::Await(Box::new(self.qualify_expression(scope, *inner, qualify_strings)))
            }
            ExpressionKind::BooleanOperator { left, operator, right } => ExpressionKind::BooleanOperator {
                left: Box::new(self.qualify_expression(scope, *left, qualify_strings)),
                operator,
                right: Box::new(self.qualify_expression(scope, *right, qualify_strings)),
            },
            ExpressionKind::ComparisonOperator { left, comparisons } => ExpressionKind::ComparisonOperator {
                left: Box::new(self.qualify_expression(scope, *left, qualify_strings)),
                comparisons: comparisons
                    .into_iter()
                    .map(|(operator, right)| (operator, self.qualify_expression(scope, right, qualify_strings)))
                    .collect(),
            },
            ExpressionKind::Dictionary(entries) => ExpressionKind::Dictionary(
                entries
                    .into_iter()
                    .map(|entry| match entry {
                        DictionaryEntry::Pair { key, value } => DictionaryEntry::Pair {
                            key: self.qualify_expression(scope, key, qualify_strings),
                            value: self.qualify_expression(scope, value, qualify_strings),
                        },
                        DictionaryEntry::Unpack(mapping) => {
                            DictionaryEntry::Unpack(self.qualify_expression(scope, mapping, qualify_strings))
                        }
                    })
                    .collect(),
            ),
            ExpressionKind::DictionaryComprehension { key, value, generators } => {
                let (inner, generators) = self.qualify_generators(scope, generators);
                ExpressionKind::DictionaryComprehension {
                    key: Box::new(self.qualify_expression(&inner, *key, qualify_strings)),
                    value: Box::new(self.qualify_expression(&inner, *value, qualify_strings)),
                    generators,
                }
            }
            ExpressionKind::Generator { element, generators } => {
                let (inner, generators) = self.qualify_generators(scope, generators);
                ExpressionKind::Generator {
                    element: Box::new(self.qualify_expression(&inner, *element, qualify_strings)),
                    generators,
                }
            }
            ExpressionKind::Lambda { parameters, body } => {
                let mut lambda_scope = scope.clone();
                let parameters = self.qualify_parameters(scope, &mut lambda_scope, parameters);
                ExpressionKind::Lambda {
                    parameters,
                    body: Box::new(self.qualify_expression(&lambda_scope, *body, qualify_strings)),
                }
            }
            ExpressionKind::List(items) => ExpressionKind::List(
                items
                    .into_iter()
                    .map(|item| self.qualify_expression(scope, item, qualify_strings))
                    .collect(),
            ),
            ExpressionKind::ListComprehension { element, generators } => {
                let (inner, generators) = self.qualify_generators(scope, generators);
                ExpressionKind::ListComprehension {
                    element: Box::new(self.qualify_expression(&inner, *element, qualify_strings)),
                    generators,
                }
            }
            ExpressionKind::Set(items) => ExpressionKind::Set(
                items
                    .into_iter()
                    .map(|item| self.qualify_expression(scope, item, qualify_strings))
                    .collect(),
            ),
            ExpressionKind::SetComprehension { element, generators } => {
                let (inner, generators) = self.qualify_generators(scope, generators);
                ExpressionKind::SetComprehension {
                    element: Box::new(self.qualify_expression(&inner, *element, qualify_strings)),
                    generators,
                }
            }
            ExpressionKind::Starred(Starred::Once(inner)) => {
                ExpressionKind::Starred(Starred::Once(Box::new(self.qualify_expression(
                    scope,
                    *inner,
                    qualify_strings,
                ))))
            }
            ExpressionKind::Starred(Starred::Twice(inner)) => {
                ExpressionKind::Starred(Starred::Twice(Box::new(self.qualify_expression(
                    scope,
                    *inner,
                    qualify_strings,
                ))))
            }
            ExpressionKind::String(literal) => ExpressionKind::String(self.qualify_string(
                scope,
                expression.location,
                literal,
                qualify_strings,
            )),
            ExpressionKind::Ternary {
                target,
                test,
                alternative,
            } => ExpressionKind::Ternary {
                target: Box::new(self.qualify_expression(scope, *target, qualify_strings)),
                test: Box::new(self.qualify_expression(scope, *test, qualify_strings)),
                alternative: Box::new(self.qualify_expression(scope, *alternative, qualify_strings)),
            },
            ExpressionKind::Tuple(items) => ExpressionKind::Tuple(
                items
                    .into_iter()
                    .map(|item| self.qualify_expression(scope, item, qualify_strings))
                    .collect(),
            ),
            ExpressionKind::UnaryOperator { operator, operand } => ExpressionKind::UnaryOperator {
                operator,
                operand: Box::new(self.qualify_expression(scope, *operand, qualify_strings)),
            },
            ExpressionKind::Yield(inner) => ExpressionKind::Yield(
                inner.map(|inner| Box::new(self.qualify_expression(scope, *inner, qualify_strings))),
            ),
            other @ (ExpressionKind::Boolean(_)
            | ExpressionKind::Complex(_)
            | ExpressionKind::Ellipsis
            | ExpressionKind::Float(_)
            | ExpressionKind::Integer(_)
            | ExpressionKind::Name(_)) => other,
        };
        expression.with_kind(kind)
    }

    /// Comprehension generators bind their targets into a scope local to
    /// the comprehension; iterators of later clauses see earlier bindings.
    fn qualify_generators(&mut self, scope: &Scope, generators: Vec<Comprehension>) -> (Scope, Vec<Comprehension>) {
        let mut inner = scope.clone();
        let mut qualified = Vec::with_capacity(generators.len());
        for generator in generators {
            let iterator = self.qualify_expression(&inner, generator.iterator, false);
            let (bound, target) = self.qualify_target(inner, generator.target, false);
            inner = bound;
            let conditions = generator
                .conditions
                .into_iter()
                .map(|condition| self.qualify_expression(&inner, condition, false))
                .collect();
            qualified.push(Comprehension {
                target,
                iterator,
                conditions,
                is_async: generator.is_async,
            });
        }
        (inner, qualified)
    }

    /// String annotations re-parse, qualify, and re-render into the string
    /// value. Failures leave the string untouched and report to the tracer.
    fn qualify_string(
        &mut self,
        scope: &Scope,
        location: crate::location::Location,
        literal: StringLiteral,
        qualify_strings: bool,
    ) -> StringLiteral {
        match literal.kind {
            StringKind::Raw if qualify_strings => {
                match self.reparse_expression(&literal.value, location) {
                    Ok(parsed) => {
                        let qualified = self.qualify_expression(scope, parsed, qualify_strings);
                        StringLiteral {
                            value: qualified.to_string(),
                            kind: StringKind::Raw,
                        }
                    }
                    Err(message) => {
                        self.tracer.on_unparsed_annotation(location, &literal.value, &message);
                        literal
                    }
                }
            }
            StringKind::Format(expressions) => StringLiteral {
                value: literal.value,
                kind: StringKind::Format(
                    expressions
                        .into_iter()
                        .map(|fragment| self.qualify_expression(scope, fragment, false))
                        .collect(),
                ),
            },
            other => StringLiteral {
                value: literal.value,
                kind: other,
            },
        }
    }

    fn reparse_expression(&mut self, text: &str, location: crate::location::Location) -> Result<Expression, String> {
        crate::parse::parse_fragment(
            self.parser,
            text,
            location.start.line,
            location.start.column + 1,
            self.handle,
        )
    }

    fn qualify_access(
        &mut self,
        scope: &Scope,
        access: Access,
        qualify_strings: bool,
        suppress_synthetics: bool,
    ) -> Access {
        match access {
            Access::Simple(elements) => {
                let mut qualified: Vec<AccessElement> = Vec::with_capacity(elements.len());
                let mut elements = elements.into_iter();
                if let Some(head) = elements.next() {
                    let replacement = match head.as_identifier() {
                        Some(name) => match scope.alias_of(name) {
                            Some(alias) if !alias.is_forward_reference || scope.use_forward_references => {
                                // Synthetic targets are suppressed in contexts
                                // (decorators) that must stay readable as the
                                // user's own names.
                                if suppress_synthetics
                                    && alias.access.last().is_some_and(|last| last.starts_with('$'))
                                {
                                    Some(alias.qualifier.child(strip_leading_underscores(name)))
                                } else {
                                    Some(alias.access.clone())
                                }
                            }
                            _ => None,
                        },
                        None => None,
                    };
                    match replacement {
                        Some(replacement) => qualified.extend(replacement.into_elements()),
                        None => {
                            let head = self.qualify_element(scope, head, false);
                            qualified.push(head);
                        }
                    }
                }
                for element in elements {
                    // `TypeVar` string arguments are annotations even outside
                    // annotation position; `Literal` arguments are values
                    // even inside one.
                    let typevar = is_typevar_prefix(&qualified);
                    let literal = is_literal_prefix(&qualified);
                    let strings = (qualify_strings || typevar) && !literal;
                    qualified.push(self.qualify_element(scope, element, strings));
                }
                Access::Simple(qualified)
            }
            Access::Expression(ExpressionAccess { expression, access }) => {
                let expression = Box::new(self.qualify_expression(scope, *expression, qualify_strings));
                let access = access
                    .into_iter()
                    .map(|element| self.qualify_element(scope, element, false))
                    .collect();
                Access::Expression(ExpressionAccess { expression, access })
            }
        }
    }

    /// Qualifies one non-head access element. Call arguments get their names
    /// parameter-prefixed and their values qualified; `qualify_strings`
    /// carries the `TypeVar` string-annotation special case.
    fn qualify_element(&mut self, scope: &Scope, element: AccessElement, qualify_strings: bool) -> AccessElement {
        match element {
            AccessElement::Identifier(name) => AccessElement::Identifier(name),
            AccessElement::Call(call) => AccessElement::Call(CallElement {
                location: call.location,
                arguments: call
                    .arguments
                    .into_iter()
                    .map(|argument| CallArgument {
                        name: argument.name.map(|name| {
                            if name.starts_with('$') {
                                name
                            } else {
                                format!("$parameter${name}")
                            }
                        }),
                        value: self.qualify_expression(scope, argument.value, qualify_strings),
                    })
                    .collect(),
            }),
        }
    }
}

/// Registers forward aliases and immutables for a block. Recurses into
/// structural statements but not into nested defines or classes.
fn explore_block(scope: &mut Scope, statements: &[Statement]) {
    for statement in statements {
        match &statement.kind {
            StatementKind::Class(Class { name, .. }) | StatementKind::Define(Define { name, .. }) => {
                forward_bind(scope, name);
            }
            StatementKind::Assign(Assign {
                target, annotation, ..
            }) => {
                if annotation.as_ref().is_some_and(is_special_form_annotation)
                    && let ExpressionKind::Access(access) = &target.kind
                {
                    forward_bind(scope, access);
                }
            }
            StatementKind::Global(names) => {
                if !scope.is_top_level {
                    for name in names {
                        scope.immutables.insert(Reference::single(name.clone()));
                    }
                }
            }
            StatementKind::For(For { body, orelse, .. })
            | StatementKind::If(If { body, orelse, .. })
            | StatementKind::While(While { body, orelse, .. }) => {
                explore_block(scope, body);
                explore_block(scope, orelse);
            }
            StatementKind::With(With { body, .. }) => explore_block(scope, body),
            StatementKind::Try(Try {
                body,
                handlers,
                orelse,
                finally,
            }) => {
                explore_block(scope, body);
                for handler in handlers {
                    explore_block(scope, &handler.body);
                }
                explore_block(scope, orelse);
                explore_block(scope, finally);
            }
            _ => {}
        }
    }
}

fn forward_bind(scope: &mut Scope, name: &Access) {
    let Some(reference) = name.as_reference() else {
        return;
    };
    if reference.names().len() != 1 {
        return;
    }
    let bare = reference.names()[0].clone();
    if bare.starts_with('$') {
        return;
    }
    let alias = Alias {
        access: scope.qualifier.child(bare.clone()),
        qualifier: scope.qualifier.clone(),
        is_forward_reference: true,
    };
    scope.bind(&bare, alias);
}

fn is_special_form_annotation(annotation: &Expression) -> bool {
    let Some(Access::Simple(elements)) = annotation.access() else {
        return false;
    };
    elements
        .last()
        .and_then(AccessElement::as_identifier)
        .is_some_and(|name| name == "_SpecialForm")
}

/// Splits the promotion of a bare class/define name: returns the bare name
/// (when there is one to alias) and the qualified access.
fn promote_name(scope: &Scope, name: &Access) -> (Option<String>, Access) {
    if let Some(reference) = name.as_reference()
        && reference.names().len() == 1
    {
        let bare = reference.names()[0].clone();
        if !bare.starts_with('$') {
            let qualified = scope.qualifier.child(bare.clone());
            return (Some(bare), qualified.into());
        }
    }
    (None, name.clone())
}

fn split_stars(name: &str) -> (&str, &str) {
    let stars = name.len() - name.trim_start_matches('*').len();
    (&name[..stars], &name[stars..])
}

/// The sanitization applied when a name is re-exposed under its qualifier:
/// any synthetic wrapper drops first, then the leading underscores.
fn strip_leading_underscores(name: &str) -> String {
    let sanitized = sanitize_identifier(name);
    sanitized.trim_start_matches('_').to_owned()
}

fn is_accessor_decorator(decorator: &Expression) -> bool {
    let Some(Access::Simple(elements)) = decorator.access() else {
        return false;
    };
    let Some(last) = elements.iter().rev().find_map(AccessElement::as_identifier) else {
        return false;
    };
    matches!(
        last,
        "staticmethod" | "classmethod" | "property" | "getter" | "setter" | "deleter"
    )
}

/// Whether the elements so far name `TypeVar` (bare or through `typing`),
/// making string call arguments annotations.
fn is_typevar_prefix(elements: &[AccessElement]) -> bool {
    elements
        .iter()
        .rev()
        .find_map(AccessElement::as_identifier)
        .is_some_and(|name| name == "TypeVar")
}

/// Whether the elements so far name `Literal`, whose arguments are values.
fn is_literal_prefix(elements: &[AccessElement]) -> bool {
    elements
        .iter()
        .rev()
        .find_map(AccessElement::as_identifier)
        .is_some_and(|name| name == "Literal")
}

/// Installs scope aliases for an import statement. The statement itself is
/// never rewritten; `builtins` imports install nothing.
fn install_import_aliases(mut scope: Scope, import: &Import) -> Scope {
    match &import.from {
        Some(from) => {
            let module = from.to_string();
            if module == "builtins" || module == "future.builtins" {
                return scope;
            }
            for entry in &import.imports {
                if entry.name.last() == Some("*") {
                    continue;
                }
                let target = from.join(&entry.name);
                let binding = match &entry.alias {
                    Some(alias) => alias.clone(),
                    None => entry.name.clone(),
                };
                let Some(binding) = binding.last().map(str::to_owned) else {
                    continue;
                };
                scope.bind(
                    &binding,
                    Alias {
                        access: target,
                        qualifier: scope.qualifier.clone(),
                        is_forward_reference: false,
                    },
                );
            }
        }
        None => {
            for entry in &import.imports {
                let Some(alias) = &entry.alias else {
                    // `import M` with no alias installs nothing; the dotted
                    // name stays resolvable through module tables.
                    continue;
                };
                let Some(binding) = alias.last().map(str::to_owned) else {
                    continue;
                };
                scope.bind(
                    &binding,
                    Alias {
                        access: entry.name.clone(),
                        qualifier: scope.qualifier.clone(),
                        is_forward_reference: false,
                    },
                );
            }
        }
    }
    scope
}
