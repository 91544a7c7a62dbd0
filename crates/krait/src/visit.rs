//! Traversal over sources: statement rewriting, full rewriting, collection.
//!
//! Transformers own their fold state — the implementor struct carries
//! whatever the pass threads through the traversal, and the driver calls it
//! with `&mut self`. Every statement may be replaced by zero, one, or many
//! statements; nested blocks are rebuilt before the enclosing statement
//! emits its replacements (post-order emission in pre-order visit order).

use crate::ast::{
    Access, AccessElement, Assign, CallElement, Class, Comprehension, Define, DictionaryEntry, Expression,
    ExpressionAccess, ExpressionKind, For, If, Parameter, Source, Starred, Statement, StatementKind, StringKind,
    StringLiteral, Try, While, With,
};

/// Statement-only rewriting.
pub trait StatementTransform {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement>;
}

/// Statement and expression rewriting, with per-statement descent pruning.
pub trait Transform {
    fn transform_expression(&mut self, expression: Expression) -> Expression {
        expression
    }

    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        vec![statement]
    }

    /// Whether the driver should rewrite anything nested under `statement`.
    fn transform_children(&mut self, _statement: &Statement) -> bool {
        true
    }
}

/// Runs a statement transformer over a source, returning the rebuilt source.
/// The transformer keeps its final state; callers read it back afterwards.
pub fn transform_statements<T: StatementTransform>(transformer: &mut T, source: Source) -> Source {
    let statements = transform_statement_list(transformer, source.statements.clone());
    source.with_statements(statements)
}

fn transform_statement_list<T: StatementTransform>(transformer: &mut T, statements: Vec<Statement>) -> Vec<Statement> {
    let mut transformed = Vec::with_capacity(statements.len());
    for statement in statements {
        let statement = transform_statement_children(transformer, statement);
        transformed.extend(transformer.transform_statement(statement));
    }
    transformed
}

fn transform_statement_children<T: StatementTransform>(transformer: &mut T, statement: Statement) -> Statement {
    let kind = match statement.kind.clone() {
        StatementKind::Class(mut class) => {
            class.body = transform_statement_list(transformer, class.body);
            StatementKind::Class(class)
        }
        StatementKind::Define(mut define) => {
            define.body = transform_statement_list(transformer, define.body);
            StatementKind::Define(define)
        }
        StatementKind::For(mut for_statement) => {
            for_statement.body = transform_statement_list(transformer, for_statement.body);
            for_statement.orelse = transform_statement_list(transformer, for_statement.orelse);
            StatementKind::For(for_statement)
        }
        StatementKind::If(mut if_statement) => {
            if_statement.body = transform_statement_list(transformer, if_statement.body);
            if_statement.orelse = transform_statement_list(transformer, if_statement.orelse);
            StatementKind::If(if_statement)
        }
        StatementKind::Try(mut try_statement) => {
            try_statement.body = transform_statement_list(transformer, try_statement.body);
            try_statement.handlers = try_statement
                .handlers
                .into_iter()
                .map(|mut handler| {
                    handler.body = transform_statement_list(transformer, handler.body);
                    handler
                })
                .collect();
            try_statement.orelse = transform_statement_list(transformer, try_statement.orelse);
            try_statement.finally = transform_statement_list(transformer, try_statement.finally);
            StatementKind::Try(try_statement)
        }
        StatementKind::While(mut while_statement) => {
            while_statement.body = transform_statement_list(transformer, while_statement.body);
            while_statement.orelse = transform_statement_list(transformer, while_statement.orelse);
            StatementKind::While(while_statement)
        }
        StatementKind::With(mut with_statement) => {
            with_statement.body = transform_statement_list(transformer, with_statement.body);
            StatementKind::With(with_statement)
        }
        other => other,
    };
    statement.with_kind(kind)
}

/// Runs a full transformer over a source.
pub fn transform_source<T: Transform>(transformer: &mut T, source: Source) -> Source {
    let statements = transform_source_list(transformer, source.statements.clone());
    source.with_statements(statements)
}

fn transform_source_list<T: Transform>(transformer: &mut T, statements: Vec<Statement>) -> Vec<Statement> {
    let mut transformed = Vec::with_capacity(statements.len());
    for statement in statements {
        let statement = if transformer.transform_children(&statement) {
            let statement = transform_full_children(transformer, statement);
            transform_statement_expressions(transformer, statement)
        } else {
            statement
        };
        transformed.extend(transformer.transform_statement(statement));
    }
    transformed
}

fn transform_full_children<T: Transform>(transformer: &mut T, statement: Statement) -> Statement {
    let kind = match statement.kind.clone() {
        StatementKind::Class(mut class) => {
            class.body = transform_source_list(transformer, class.body);
            StatementKind::Class(class)
        }
        StatementKind::Define(mut define) => {
            define.body = transform_source_list(transformer, define.body);
            StatementKind::Define(define)
        }
        StatementKind::For(mut for_statement) => {
            for_statement.body = transform_source_list(transformer, for_statement.body);
            for_statement.orelse = transform_source_list(transformer, for_statement.orelse);
            StatementKind::For(for_statement)
        }
        StatementKind::If(mut if_statement) => {
            if_statement.body = transform_source_list(transformer, if_statement.body);
            if_statement.orelse = transform_source_list(transformer, if_statement.orelse);
            StatementKind::If(if_statement)
        }
        StatementKind::Try(mut try_statement) => {
            try_statement.body = transform_source_list(transformer, try_statement.body);
            try_statement.handlers = try_statement
                .handlers
                .into_iter()
                .map(|mut handler| {
                    handler.body = transform_source_list(transformer, handler.body);
                    handler
                })
                .collect();
            try_statement.orelse = transform_source_list(transformer, try_statement.orelse);
            try_statement.finally = transform_source_list(transformer, try_statement.finally);
            StatementKind::Try(try_statement)
        }
        StatementKind::While(mut while_statement) => {
            while_statement.body = transform_source_list(transformer, while_statement.body);
            while_statement.orelse = transform_source_list(transformer, while_statement.orelse);
            StatementKind::While(while_statement)
        }
        StatementKind::With(mut with_statement) => {
            with_statement.body = transform_source_list(transformer, with_statement.body);
            StatementKind::With(with_statement)
        }
        other => other,
    };
    statement.with_kind(kind)
}

fn transform_statement_expressions<T: Transform>(transformer: &mut T, statement: Statement) -> Statement {
    let transform = |transformer: &mut T, expression: Expression| transform_expression_tree(transformer, expression);
    let transform_option = |transformer: &mut T, expression: Option<Expression>| {
        expression.map(|expression| transform_expression_tree(transformer, expression))
    };
    let kind = match statement.kind.clone() {
        StatementKind::Assign(assign) => StatementKind::Assign(Assign {
            target: transform(transformer, assign.target),
            annotation: transform_option(transformer, assign.annotation),
            value: transform_option(transformer, assign.value),
            parent: assign.parent,
        }),
        StatementKind::Assert { test, message } => StatementKind::Assert {
            test: transform(transformer, test),
            message: transform_option(transformer, message),
        },
        StatementKind::Class(mut class) => {
            class.bases = class
                .bases
                .into_iter()
                .map(|mut base| {
                    base.value = transform_expression_tree(transformer, base.value);
                    base
                })
                .collect();
            class.decorators = class
                .decorators
                .into_iter()
                .map(|decorator| transform_expression_tree(transformer, decorator))
                .collect();
            StatementKind::Class(class)
        }
        StatementKind::Define(mut define) => {
            define.parameters = define
                .parameters
                .into_iter()
                .map(|parameter| transform_parameter(transformer, parameter))
                .collect();
            define.decorators = define
                .decorators
                .into_iter()
                .map(|decorator| transform_expression_tree(transformer, decorator))
                .collect();
            define.return_annotation = transform_option(transformer, define.return_annotation);
            StatementKind::Define(define)
        }
        StatementKind::Delete(targets) => StatementKind::Delete(
            targets
                .into_iter()
                .map(|target| transform_expression_tree(transformer, target))
                .collect(),
        ),
        StatementKind::Expression(expression) => StatementKind::Expression(transform(transformer, expression)),
        StatementKind::For(mut for_statement) => {
            for_statement.target = transform(transformer, for_statement.target);
            for_statement.iterator = transform(transformer, for_statement.iterator);
            StatementKind::For(for_statement)
        }
        StatementKind::If(mut if_statement) => {
            if_statement.test = transform(transformer, if_statement.test);
            StatementKind::If(if_statement)
        }
        StatementKind::Raise(expression) => StatementKind::Raise(transform_option(transformer, expression)),
        StatementKind::Return {
            expression,
            is_implicit,
        } => StatementKind::Return {
            expression: transform_option(transformer, expression),
            is_implicit,
        },
        StatementKind::Try(mut try_statement) => {
            try_statement.handlers = try_statement
                .handlers
                .into_iter()
                .map(|mut handler| {
                    handler.kind = handler
                        .kind
                        .map(|kind| transform_expression_tree(transformer, kind));
                    handler
                })
                .collect();
            StatementKind::Try(try_statement)
        }
        StatementKind::While(mut while_statement) => {
            while_statement.test = transform(transformer, while_statement.test);
            StatementKind::While(while_statement)
        }
        StatementKind::With(mut with_statement) => {
            with_statement.items = with_statement
                .items
                .into_iter()
                .map(|(item, target)| {
                    (
                        transform_expression_tree(transformer, item),
                        target.map(|target| transform_expression_tree(transformer, target)),
                    )
                })
                .collect();
            StatementKind::With(with_statement)
        }
        StatementKind::Yield(expression) => StatementKind::Yield(transform(transformer, expression)),
        StatementKind::YieldFrom(expression) => StatementKind::YieldFrom(transform(transformer, expression)),
        other => other,
    };
    statement.with_kind(kind)
}

fn transform_parameter<T: Transform>(transformer: &mut T, mut parameter: Parameter) -> Parameter {
    parameter.value = parameter
        .value
        .map(|value| transform_expression_tree(transformer, value));
    parameter.annotation = parameter
        .annotation
        .map(|annotation| transform_expression_tree(transformer, annotation));
    parameter
}

fn transform_elements<T: Transform>(transformer: &mut T, elements: Vec<AccessElement>) -> Vec<AccessElement> {
    elements
        .into_iter()
        .map(|element| match element {
            AccessElement::Identifier(name) => AccessElement::Identifier(name),
            AccessElement::Call(call) => AccessElement::Call(CallElement {
                location: call.location,
                arguments: call
                    .arguments
                    .into_iter()
                    .map(|mut argument| {
                        argument.value = transform_expression_tree(transformer, argument.value);
                        argument
                    })
                    .collect(),
            }),
        })
        .collect()
}

fn transform_generators<T: Transform>(transformer: &mut T, generators: Vec<Comprehension>) -> Vec<Comprehension> {
    generators
        .into_iter()
        .map(|generator| Comprehension {
            target: transform_expression_tree(transformer, generator.target),
            iterator: transform_expression_tree(transformer, generator.iterator),
            conditions: generator
                .conditions
                .into_iter()
                .map(|condition| transform_expression_tree(transformer, condition))
                .collect(),
            is_async: generator.is_async,
        })
        .collect()
}

/// Rewrites an expression tree bottom-up, applying `transform_expression` to
/// every rebuilt node.
pub fn transform_expression_tree<T: Transform>(transformer: &mut T, expression: Expression) -> Expression {
    let transform_boxed =
        |transformer: &mut T, inner: Box<Expression>| Box::new(transform_expression_tree(transformer, *inner));
    let kind = match expression.kind.clone() {
        ExpressionKind::Access(access) => ExpressionKind::Access(match access {
            Access::Simple(elements) => Access::Simple(transform_elements(transformer, elements)),
            Access::Expression(ExpressionAccess {
                expression: base,
                access,
            }) => Access::Expression(ExpressionAccess {
                expression: transform_boxed(transformer, base),
                access: transform_elements(transformer, access),
            }),
        }),
        ExpressionKind::Await(inner) => ExpressionKind::Await(transform_boxed(transformer, inner)),
        ExpressionKind::BooleanOperator { left, operator, right } => ExpressionKind::BooleanOperator {
            left: transform_boxed(transformer, left),
            operator,
            right: transform_boxed(transformer, right),
        },
        ExpressionKind::ComparisonOperator { left, comparisons } => ExpressionKind::ComparisonOperator {
            left: transform_boxed(transformer, left),
            comparisons: comparisons
                .into_iter()
                .map(|(operator, right)| (operator, transform_expression_tree(transformer, right)))
                .collect(),
        },
        ExpressionKind::Dictionary(entries) => ExpressionKind::Dictionary(
            entries
                .into_iter()
                .map(|entry| match entry {
                    DictionaryEntry::Pair { key, value } => DictionaryEntry::Pair {
                        key: transform_expression_tree(transformer, key),
                        value: transform_expression_tree(transformer, value),
                    },
                    DictionaryEntry::Unpack(mapping) => {
                        DictionaryEntry::Unpack(transform_expression_tree(transformer, mapping))
                    }
                })
                .collect(),
        ),
        ExpressionKind::DictionaryComprehension { key, value, generators } => ExpressionKind::DictionaryComprehension {
            key: transform_boxed(transformer, key),
            value: transform_boxed(transformer, value),
            generators: transform_generators(transformer, generators),
        },
        ExpressionKind::Generator { element, generators } => ExpressionKind::Generator {
            element: transform_boxed(transformer, element),
            generators: transform_generators(transformer, generators),
        },
        ExpressionKind::Lambda { parameters, body } => ExpressionKind::Lambda {
            parameters: parameters
                .into_iter()
                .map(|parameter| transform_parameter(transformer, parameter))
                .collect(),
            body: transform_boxed(transformer, body),
        },
        ExpressionKind::List(items) => ExpressionKind::List(
            items
                .into_iter()
                .map(|item| transform_expression_tree(transformer, item))
                .collect(),
        ),
        ExpressionKind::ListComprehension { element, generators } => ExpressionKind::ListComprehension {
            element: transform_boxed(transformer, element),
            generators: transform_generators(transformer, generators),
        },
        ExpressionKind::Set(items) => ExpressionKind::Set(
            items
                .into_iter()
                .map(|item| transform_expression_tree(transformer, item))
                .collect(),
        ),
        ExpressionKind::SetComprehension { element, generators } => ExpressionKind::SetComprehension {
            element: transform_boxed(transformer, element),
            generators: transform_generators(transformer, generators),
        },
        ExpressionKind::Starred(Starred::Once(inner)) => {
            ExpressionKind::Starred(Starred::Once(transform_boxed(transformer, inner)))
        }
        ExpressionKind::Starred(Starred::Twice(inner)) => {
            ExpressionKind::Starred(Starred::Twice(transform_boxed(transformer, inner)))
        }
        ExpressionKind::String(literal) => ExpressionKind::String(StringLiteral {
            value: literal.value,
            kind: match literal.kind {
                StringKind::Format(expressions) => StringKind::Format(
                    expressions
                        .into_iter()
                        .map(|fragment| transform_expression_tree(transformer, fragment))
                        .collect(),
                ),
                other => other,
            },
        }),
        ExpressionKind::Ternary {
            target,
            test,
            alternative,
        } => ExpressionKind::Ternary {
            target: transform_boxed(transformer, target),
            test: transform_boxed(transformer, test),
            alternative: transform_boxed(transformer, alternative),
        },
        ExpressionKind::Tuple(items) => ExpressionKind::Tuple(
            items
                .into_iter()
                .map(|item| transform_expression_tree(transformer, item))
                .collect(),
        ),
        ExpressionKind::UnaryOperator { operator, operand } => ExpressionKind::UnaryOperator {
            operator,
            operand: transform_boxed(transformer, operand),
        },
        ExpressionKind::Yield(inner) => {
            ExpressionKind::Yield(inner.map(|inner| transform_boxed(transformer, inner)))
        }
        other => other,
    };
    transformer.transform_expression(expression.with_kind(kind))
}

/// Lazy pre-order iterator over statements matched by `matches`, pruning
/// descent wherever `descend` rejects a node.
pub struct Collector<'a, M, D> {
    stack: Vec<&'a Statement>,
    matches: M,
    descend: D,
}

impl<'a, M, D> Iterator for Collector<'a, M, D>
where
    M: FnMut(&Statement) -> bool,
    D: FnMut(&Statement) -> bool,
{
    type Item = &'a Statement;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(statement) = self.stack.pop() {
            if (self.descend)(statement) {
                for block in child_blocks(statement).into_iter().rev() {
                    for child in block.iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
            if (self.matches)(statement) {
                return Some(statement);
            }
        }
        None
    }
}

fn child_blocks(statement: &Statement) -> Vec<&[Statement]> {
    match &statement.kind {
        StatementKind::Class(Class { body, .. })
        | StatementKind::Define(Define { body, .. })
        | StatementKind::With(With { body, .. }) => vec![body],
        StatementKind::For(For { body, orelse, .. })
        | StatementKind::If(If { body, orelse, .. })
        | StatementKind::While(While { body, orelse, .. }) => vec![body, orelse],
        StatementKind::Try(Try {
            body,
            handlers,
            orelse,
            finally,
        }) => {
            let mut blocks: Vec<&[Statement]> = vec![body];
            for handler in handlers {
                blocks.push(&handler.body);
            }
            blocks.push(orelse);
            blocks.push(finally);
            blocks
        }
        _ => Vec::new(),
    }
}

/// Collects statements matched by `matches`, descending only where
/// `descend` allows.
pub fn collect_statements<'a, M, D>(statements: &'a [Statement], matches: M, descend: D) -> Collector<'a, M, D>
where
    M: FnMut(&Statement) -> bool,
    D: FnMut(&Statement) -> bool,
{
    let mut stack: Vec<&Statement> = Vec::with_capacity(statements.len());
    for statement in statements.iter().rev() {
        stack.push(statement);
    }
    Collector {
        stack,
        matches,
        descend,
    }
}
