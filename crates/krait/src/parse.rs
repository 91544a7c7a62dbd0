//! The surface-parser contract and the shipped ruff-backed implementation.
//!
//! The pipeline re-enters the parser for string annotations and f-string
//! fragments, so the contract is reentrant and takes a `(start_line,
//! start_column)` origin: positions in the produced nodes are shifted so
//! diagnostics line up with the enclosing file.
//!
//! [`RuffParser`] lowers the ruff AST into the Access-based tree. The
//! lowering is where the surface syntax loses its operator sugar: binary
//! operators, subscripts, and slices become accesses on dunder methods,
//! augmented assignments become plain assignments through the in-place
//! dunder, and elif chains nest into `If` statements. The lowering is
//! context-aware for subscripts: reads go through `__getitem__`, while a
//! subscript in assignment or delete position dispatches through
//! `__setitem__` / `__delitem__`.

use std::cell::Cell;

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ElifElseClause, Expr as AstExpr, Keyword, Number, Operator as AstOperator,
    ParameterWithDefault, Stmt, UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::{
    ast::{
        Access, AccessElement, Assign, BinaryOperator, BooleanOperator, CallArgument, CallElement, Class,
        ComparisonOperator, Comprehension, Define, DictionaryEntry, Expression, ExpressionAccess, ExpressionKind, For,
        Handler, If, Import, ImportEntry, Metadata, NodeId, Parameter, Reference, Source, Starred, Statement,
        StatementKind, StringKind, StringLiteral, Substring, SubstringKind, Try, UnaryOperator, While, With,
    },
    location::{Handle, HandleTable, Location, Position},
};

/// Errors produced while lowering surface syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error at {location}: {message}")]
    Syntax { message: String, location: Location },
    #[error("unsupported syntax at {location}: {message}")]
    Unsupported { message: String, location: Location },
}

impl ParseError {
    fn syntax(message: impl Into<String>, location: Location) -> Self {
        Self::Syntax {
            message: message.into(),
            location,
        }
    }

    fn unsupported(message: impl Into<String>, location: Location) -> Self {
        Self::Unsupported {
            message: message.into(),
            location,
        }
    }

    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::Syntax { location, .. } | Self::Unsupported { location, .. } => *location,
        }
    }
}

/// The parser contract consumed by the normalization pipeline.
///
/// Implementations must be pure in their inputs: the pipeline calls back
/// into the parser mid-pass and relies on nothing leaking between calls.
pub trait Parse {
    /// Parses `text` into statements, with node positions shifted to the
    /// given origin and attributed to `handle`.
    fn parse(&self, text: &str, start_line: usize, start_column: usize, handle: Handle)
    -> Result<Vec<Statement>, ParseError>;
}

/// [`Parse`] implementation over `ruff_python_parser`.
///
/// Node ids keep incrementing across calls so re-parsed fragments never
/// collide with ids already assigned in the enclosing source.
#[derive(Debug, Default)]
pub struct RuffParser {
    next_id: Cell<u32>,
}

impl RuffParser {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: Cell::new(0) }
    }

    /// Parses a whole source file and wraps it with its qualifier and
    /// metadata.
    pub fn parse_source(
        &self,
        code: &str,
        path: &str,
        qualifier: &str,
        handles: &mut HandleTable,
    ) -> Result<Source, ParseError> {
        let handle = handles.intern(path);
        let statements = self.parse(code, 1, 0, handle)?;
        Ok(Source {
            handle,
            qualifier: Reference::from_dotted(qualifier),
            statements,
            metadata: Metadata {
                path: path.to_owned(),
                number_of_lines: code.lines().count(),
                is_stub: path.ends_with(".pyi"),
            },
        })
    }
}

impl Parse for RuffParser {
    fn parse(
        &self,
        text: &str,
        start_line: usize,
        start_column: usize,
        handle: Handle,
    ) -> Result<Vec<Statement>, ParseError> {
        let mut lowering = Lowering::new(text, start_line, start_column, handle, &self.next_id);
        let parsed = parse_module(text)
            .map_err(|error| ParseError::syntax(error.to_string(), lowering.convert_range(error.range())))?;
        let module = parsed.into_syntax();
        lowering.parse_statements(module.body)
    }
}

/// One lowering run over a single text. Holds the line table used to turn
/// ruff's byte offsets into line/column positions.
struct Lowering<'a> {
    code: &'a str,
    line_ends: Vec<usize>,
    start_line: usize,
    start_column: usize,
    handle: Handle,
    next_id: &'a Cell<u32>,
}

impl<'a> Lowering<'a> {
    fn new(code: &'a str, start_line: usize, start_column: usize, handle: Handle, next_id: &'a Cell<u32>) -> Self {
        // Position of each newline, to convert byte offsets into line and
        // column numbers.
        let mut line_ends = vec![];
        for (index, character) in code.char_indices() {
            if character == '\n' {
                line_ends.push(index);
            }
        }
        Self {
            code,
            line_ends,
            start_line,
            start_column,
            handle,
            next_id,
        }
    }

    fn next_node_id(&mut self) -> NodeId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        NodeId(id)
    }

    fn index_to_position(&self, index: usize) -> Position {
        let mut line_start = 0;
        let mut line_number = 0;
        for (line, line_end) in self.line_ends.iter().enumerate() {
            if index <= *line_end {
                line_number = line;
                return self.offset_position(line_number + 1, index - line_start);
            }
            line_start = *line_end + 1;
            line_number = line + 1;
        }
        self.offset_position(line_number + 1, index - line_start)
    }

    /// Applies the parse origin: fragment line 1 sits at `start_line`, and
    /// only columns on that first line shift by `start_column`.
    fn offset_position(&self, line: usize, column: usize) -> Position {
        let column = if line == 1 { column + self.start_column } else { column };
        Position::new(line + self.start_line - 1, column)
    }

    fn convert_range(&self, range: TextRange) -> Location {
        let start = self.index_to_position(range.start().into());
        let stop = self.index_to_position(range.end().into());
        Location::new(self.handle, start, stop)
    }

    fn convert_span(&self, start: usize, end: usize) -> Location {
        Location::new(self.handle, self.index_to_position(start), self.index_to_position(end))
    }

    // -- statements ---------------------------------------------------------

    fn parse_statements(&mut self, statements: ruff_python_ast::Suite) -> Result<Vec<Statement>, ParseError> {
        let mut lowered = Vec::with_capacity(statements.len());
        for statement in statements {
            lowered.extend(self.parse_statement(statement)?);
        }
        Ok(lowered)
    }

    fn parse_elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> Result<Vec<Statement>, ParseError> {
        let mut tail: Vec<Statement> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let location = self.convert_range(clause.range);
                    let id = self.next_node_id();
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body)?;
                    let orelse = tail;
                    tail = vec![Statement::new(
                        location,
                        id,
                        StatementKind::If(If { test, body, orelse }),
                    )];
                }
                None => {
                    tail = self.parse_statements(clause.body)?;
                }
            }
        }
        Ok(tail)
    }

    fn parse_except_handler(&mut self, handler: ast::ExceptHandler) -> Result<Handler, ParseError> {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        let kind = match handler.type_ {
            Some(expression) => Some(self.parse_expression(*expression)?),
            None => None,
        };
        let name = handler.name.map(|name| name.id.to_string());
        let body = self.parse_statements(handler.body)?;
        Ok(Handler { kind, name, body })
    }

    fn parse_statement(&mut self, statement: Stmt) -> Result<Vec<Statement>, ParseError> {
        let location = self.convert_range(statement.range());
        let id = self.next_node_id();
        let kind = match statement {
            Stmt::FunctionDef(function) => {
                let parameters = self.parse_parameters(&function.parameters)?;
                let return_annotation = function
                    .returns
                    .map(|annotation| self.parse_expression(*annotation))
                    .transpose()?;
                let decorators = function
                    .decorator_list
                    .into_iter()
                    .map(|decorator| self.parse_expression(decorator.expression))
                    .collect::<Result<Vec<_>, _>>()?;
                let is_async = function.is_async;
                let body = self.parse_statements(function.body)?;
                let docstring = docstring_of(&body);
                StatementKind::Define(Define {
                    name: Access::name(function.name.id.to_string()),
                    parameters,
                    body,
                    decorators,
                    return_annotation,
                    is_async,
                    parent: None,
                    docstring,
                })
            }
            Stmt::ClassDef(class) => {
                let mut bases = Vec::new();
                if let Some(arguments) = class.arguments {
                    for base in arguments.args.into_vec() {
                        bases.push(CallArgument::positional(self.parse_expression(base)?));
                    }
                    for keyword in arguments.keywords {
                        bases.push(self.parse_keyword(keyword)?);
                    }
                }
                let decorators = class
                    .decorator_list
                    .into_iter()
                    .map(|decorator| self.parse_expression(decorator.expression))
                    .collect::<Result<Vec<_>, _>>()?;
                let body = self.parse_statements(class.body)?;
                let docstring = docstring_of(&body);
                StatementKind::Class(Class {
                    name: Access::name(class.name.id.to_string()),
                    bases,
                    body,
                    decorators,
                    docstring,
                })
            }
            Stmt::Return(ast::StmtReturn { value, .. }) => StatementKind::Return {
                expression: value.map(|value| self.parse_expression(*value)).transpose()?,
                is_implicit: false,
            },
            Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                // Deleting through a subscript dispatches to `__delitem__`;
                // mixed target lists flatten into one statement per target.
                if targets.iter().any(|target| matches!(target, AstExpr::Subscript(_))) {
                    let mut statements = Vec::with_capacity(targets.len());
                    for target in targets {
                        let id = if statements.is_empty() { id } else { self.next_node_id() };
                        let kind = match target {
                            AstExpr::Subscript(subscript) => {
                                StatementKind::Expression(self.subscript_delete(subscript)?)
                            }
                            other => StatementKind::Delete(vec![self.parse_expression(other)?]),
                        };
                        statements.push(Statement::new(location, id, kind));
                    }
                    return Ok(statements);
                }
                StatementKind::Delete(
                    targets
                        .into_iter()
                        .map(|target| self.parse_expression(target))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let value = self.parse_expression(*value)?;
                let mut statements = Vec::with_capacity(targets.len());
                for target in targets {
                    let id = if statements.is_empty() { id } else { self.next_node_id() };
                    let kind = match target {
                        // Assigning through a subscript is a method call,
                        // not a binding: `d[k] = v` dispatches to
                        // `d.__setitem__(k, v)`.
                        AstExpr::Subscript(subscript) => {
                            StatementKind::Expression(self.subscript_store(subscript, value.clone())?)
                        }
                        other => StatementKind::Assign(Assign {
                            target: self.parse_expression(other)?,
                            annotation: None,
                            value: Some(value.clone()),
                            parent: None,
                        }),
                    };
                    statements.push(Statement::new(location, id, kind));
                }
                return Ok(statements);
            }
            Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => StatementKind::Assign(Assign {
                target: self.parse_expression(*target)?,
                annotation: Some(self.parse_expression(*annotation)?),
                value: value.map(|value| self.parse_expression(*value)).transpose()?,
                parent: None,
            }),
            Stmt::AugAssign(ast::StmtAugAssign {
                target, op, value, range, ..
            }) => {
                // `x += y` reads as `x = x.__iadd__(y)`: the canonical tree
                // has no augmented-assignment form.
                let operator = convert_operator(op);
                let value = self.parse_expression(*value)?;
                let call_location = self.convert_range(range);
                match *target {
                    // `d[k] += v` reads the slot, applies the in-place
                    // dunder, and stores the result back through
                    // `__setitem__`.
                    AstExpr::Subscript(subscript) => {
                        let read = self.parse_expression(AstExpr::Subscript(subscript.clone()))?;
                        let updated = append_to_access(
                            read,
                            vec![
                                AccessElement::identifier(operator.inplace_dunder()),
                                AccessElement::Call(CallElement {
                                    location: call_location,
                                    arguments: vec![CallArgument::positional(value)],
                                }),
                            ],
                            call_location,
                        );
                        StatementKind::Expression(self.subscript_store(subscript, updated)?)
                    }
                    other => {
                        let target = self.parse_expression(other)?;
                        let call = append_to_access(
                            target.clone(),
                            vec![
                                AccessElement::identifier(operator.inplace_dunder()),
                                AccessElement::Call(CallElement {
                                    location: call_location,
                                    arguments: vec![CallArgument::positional(value)],
                                }),
                            ],
                            call_location,
                        );
                        StatementKind::Assign(Assign {
                            target,
                            annotation: None,
                            value: Some(call),
                            parent: None,
                        })
                    }
                }
            }
            Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                is_async,
                ..
            }) => StatementKind::For(For {
                target: self.parse_expression(*target)?,
                iterator: self.parse_expression(*iter)?,
                body: self.parse_statements(body)?,
                orelse: self.parse_statements(orelse)?,
                is_async,
            }),
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => StatementKind::While(While {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                orelse: self.parse_statements(orelse)?,
            }),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => StatementKind::If(If {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                orelse: self.parse_elif_else_clauses(elif_else_clauses)?,
            }),
            Stmt::With(ast::StmtWith {
                items, body, is_async, ..
            }) => {
                let mut lowered = Vec::with_capacity(items.len());
                for item in items {
                    let context = self.parse_expression(item.context_expr)?;
                    let target = item
                        .optional_vars
                        .map(|target| self.parse_expression(*target))
                        .transpose()?;
                    lowered.push((context, target));
                }
                StatementKind::With(With {
                    items: lowered,
                    body: self.parse_statements(body)?,
                    is_async,
                })
            }
            Stmt::Raise(ast::StmtRaise { exc, .. }) => {
                StatementKind::Raise(exc.map(|exc| self.parse_expression(*exc)).transpose()?)
            }
            Stmt::Try(try_statement) => {
                if try_statement.is_star {
                    return Err(ParseError::unsupported("except* handlers", location));
                }
                StatementKind::Try(Try {
                    body: self.parse_statements(try_statement.body)?,
                    handlers: try_statement
                        .handlers
                        .into_iter()
                        .map(|handler| self.parse_except_handler(handler))
                        .collect::<Result<Vec<_>, _>>()?,
                    orelse: self.parse_statements(try_statement.orelse)?,
                    finally: self.parse_statements(try_statement.finalbody)?,
                })
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => StatementKind::Assert {
                test: self.parse_expression(*test)?,
                message: msg.map(|message| self.parse_expression(*message)).transpose()?,
            },
            Stmt::Import(ast::StmtImport { names, .. }) => StatementKind::Import(Import {
                from: None,
                imports: names
                    .into_iter()
                    .map(|alias| ImportEntry {
                        name: Reference::from_dotted(&alias.name),
                        alias: alias.asname.map(|asname| Reference::single(asname.id.to_string())),
                    })
                    .collect(),
            }),
            Stmt::ImportFrom(ast::StmtImportFrom {
                module, names, level, ..
            }) => {
                // Relative imports keep their dots as the head component
                // (`from ..a import b` has `from = ["..", "a"]`); the
                // relative-import pass resolves them against the qualifier.
                let mut from = Vec::new();
                if level > 0 {
                    from.push(".".repeat(level as usize));
                }
                if let Some(module) = module {
                    from.extend(module.id.split('.').map(str::to_owned));
                }
                StatementKind::Import(Import {
                    from: Some(Reference::new(from)),
                    imports: names
                        .into_iter()
                        .map(|alias| ImportEntry {
                            name: Reference::from_dotted(&alias.name),
                            alias: alias.asname.map(|asname| Reference::single(asname.id.to_string())),
                        })
                        .collect(),
                })
            }
            Stmt::Global(ast::StmtGlobal { names, .. }) => {
                StatementKind::Global(names.into_iter().map(|name| name.id.to_string()).collect())
            }
            Stmt::Nonlocal(ast::StmtNonlocal { names, .. }) => {
                StatementKind::Nonlocal(names.into_iter().map(|name| name.id.to_string()).collect())
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => match *value {
                AstExpr::Yield(ast::ExprYield { value, range, .. }) => {
                    let yield_location = self.convert_range(range);
                    let inner = value.map(|value| self.parse_expression(*value)).transpose()?;
                    StatementKind::Yield(Expression::new(
                        yield_location,
                        ExpressionKind::Yield(inner.map(Box::new)),
                    ))
                }
                AstExpr::YieldFrom(ast::ExprYieldFrom { value, .. }) => {
                    StatementKind::YieldFrom(self.parse_expression(*value)?)
                }
                other => StatementKind::Expression(self.parse_expression(other)?),
            },
            Stmt::Pass(_) => StatementKind::Pass,
            Stmt::Break(_) => StatementKind::Break,
            Stmt::Continue(_) => StatementKind::Continue,
            Stmt::Match(_) => return Err(ParseError::unsupported("match statements", location)),
            Stmt::TypeAlias(_) => return Err(ParseError::unsupported("type alias statements", location)),
            Stmt::IpyEscapeCommand(_) => return Err(ParseError::unsupported("IPython escape commands", location)),
        };
        Ok(vec![Statement::new(location, id, kind)])
    }

    // -- expressions --------------------------------------------------------

    fn parse_expression(&mut self, expression: AstExpr) -> Result<Expression, ParseError> {
        let location = self.convert_range(expression.range());
        let kind = match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                // Chained `a and b and c` right-folds into nested binaries.
                let operator = match op {
                    BoolOp::And => BooleanOperator::And,
                    BoolOp::Or => BooleanOperator::Or,
                };
                let mut values = values.into_iter().rev();
                let last = values
                    .next()
                    .ok_or_else(|| ParseError::syntax("empty boolean operation", location))?;
                let mut result = self.parse_expression(last)?;
                for value in values {
                    let left = self.parse_expression(value)?;
                    result = Expression::new(
                        location,
                        ExpressionKind::BooleanOperator {
                            left: Box::new(left),
                            operator,
                            right: Box::new(result),
                        },
                    );
                }
                return Ok(result);
            }
            AstExpr::Named(_) => {
                return Err(ParseError::unsupported("assignment expressions (walrus)", location));
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => {
                let operator = convert_operator(op);
                let left = self.parse_expression(*left)?;
                let right = self.parse_expression(*right)?;
                let call_location = self.convert_range(range);
                return Ok(append_to_access(
                    left,
                    vec![
                        AccessElement::identifier(operator.dunder()),
                        AccessElement::Call(CallElement {
                            location: call_location,
                            arguments: vec![CallArgument::positional(right)],
                        }),
                    ],
                    location,
                ));
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => ExpressionKind::UnaryOperator {
                operator: match op {
                    UnaryOp::Invert => UnaryOperator::Invert,
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::UAdd => UnaryOperator::Positive,
                    UnaryOp::USub => UnaryOperator::Negative,
                },
                operand: Box::new(self.parse_expression(*operand)?),
            },
            AstExpr::Lambda(ast::ExprLambda { parameters, body, .. }) => ExpressionKind::Lambda {
                parameters: match parameters {
                    Some(parameters) => self.parse_parameters(&parameters)?,
                    None => Vec::new(),
                },
                body: Box::new(self.parse_expression(*body)?),
            },
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => ExpressionKind::Ternary {
                target: Box::new(self.parse_expression(*body)?),
                test: Box::new(self.parse_expression(*test)?),
                alternative: Box::new(self.parse_expression(*orelse)?),
            },
            AstExpr::Dict(ast::ExprDict { items, .. }) => {
                let mut entries = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let value = self.parse_expression(value)?;
                    match key {
                        Some(key) => entries.push(DictionaryEntry::Pair {
                            key: self.parse_expression(key)?,
                            value,
                        }),
                        None => entries.push(DictionaryEntry::Unpack(value)),
                    }
                }
                ExpressionKind::Dictionary(entries)
            }
            AstExpr::Set(ast::ExprSet { elts, .. }) => ExpressionKind::Set(self.parse_expressions(elts)?),
            AstExpr::List(ast::ExprList { elts, .. }) => ExpressionKind::List(self.parse_expressions(elts)?),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => ExpressionKind::Tuple(self.parse_expressions(elts)?),
            AstExpr::ListComp(ast::ExprListComp {
                elt, generators, ..
            }) => ExpressionKind::ListComprehension {
                element: Box::new(self.parse_expression(*elt)?),
                generators: self.parse_generators(generators)?,
            },
            AstExpr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            }) => ExpressionKind::SetComprehension {
                element: Box::new(self.parse_expression(*elt)?),
                generators: self.parse_generators(generators)?,
            },
            AstExpr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => ExpressionKind::DictionaryComprehension {
                key: Box::new(self.parse_expression(*key.expect("dict comprehension key"))?),
                value: Box::new(self.parse_expression(*value)?),
                generators: self.parse_generators(generators)?,
            },
            AstExpr::Generator(ast::ExprGenerator {
                elt, generators, ..
            }) => ExpressionKind::Generator {
                element: Box::new(self.parse_expression(*elt)?),
                generators: self.parse_generators(generators)?,
            },
            AstExpr::Await(ast::ExprAwait { value, .. }) => {
                ExpressionKind::Await(Box::new(self.parse_expression(*value)?))
            }
            AstExpr::Yield(ast::ExprYield { value, .. }) => {
                ExpressionKind::Yield(value.map(|value| self.parse_expression(*value).map(Box::new)).transpose()?)
            }
            AstExpr::YieldFrom(ast::ExprYieldFrom { value, .. }) => {
                ExpressionKind::Yield(Some(Box::new(self.parse_expression(*value)?)))
            }
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                ..
            }) => {
                let left = Box::new(self.parse_expression(*left)?);
                let mut comparisons = Vec::with_capacity(ops.len());
                for (op, comparator) in ops.into_vec().into_iter().zip(comparators.into_vec()) {
                    comparisons.push((convert_comparison(op), self.parse_expression(comparator)?));
                }
                ExpressionKind::ComparisonOperator { left, comparisons }
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                let call_location = self.convert_range(range);
                let ast::Arguments { args, keywords, .. } = arguments;
                let mut lowered = Vec::new();
                for argument in args.into_vec() {
                    lowered.push(CallArgument::positional(self.parse_expression(argument)?));
                }
                for keyword in keywords {
                    lowered.push(self.parse_keyword(keyword)?);
                }
                let callee = self.parse_expression(*func)?;
                return Ok(append_to_access(
                    callee,
                    vec![AccessElement::Call(CallElement {
                        location: call_location,
                        arguments: lowered,
                    })],
                    location,
                ));
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => self.parse_format_string(&value)?,
            AstExpr::TString(_) => return Err(ParseError::unsupported("template strings", location)),
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => ExpressionKind::String(StringLiteral {
                value: value.to_string(),
                kind: StringKind::Raw,
            }),
            AstExpr::BytesLiteral(ast::ExprBytesLiteral { value, .. }) => {
                let bytes: std::borrow::Cow<'_, [u8]> = std::borrow::Cow::from(&value);
                ExpressionKind::String(StringLiteral {
                    value: String::from_utf8_lossy(&bytes).into_owned(),
                    kind: StringKind::Raw,
                })
            }
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => match value {
                Number::Int(int) => {
                    let value = match int.as_i64() {
                        Some(value) => BigInt::from(value),
                        None => parse_int_literal(&int.to_string())
                            .ok_or_else(|| ParseError::syntax(format!("invalid integer literal: {int}"), location))?,
                    };
                    ExpressionKind::Integer(value)
                }
                Number::Float(value) => ExpressionKind::Float(value),
                Number::Complex { imag, .. } => ExpressionKind::Complex(imag),
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => ExpressionKind::Boolean(value),
            AstExpr::NoneLiteral(_) => ExpressionKind::Name("None".to_owned()),
            AstExpr::EllipsisLiteral(_) => ExpressionKind::Ellipsis,
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                let base = self.parse_expression(*value)?;
                return Ok(append_to_access(
                    base,
                    vec![AccessElement::identifier(attr.id().to_string())],
                    location,
                ));
            }
            AstExpr::Subscript(ast::ExprSubscript { value, slice, range, .. }) => {
                // `a[b]` reads as `a.__getitem__(b)`.
                let base = self.parse_expression(*value)?;
                let index = self.parse_expression(*slice)?;
                let call_location = self.convert_range(range);
                return Ok(append_to_access(
                    base,
                    vec![
                        AccessElement::identifier("__getitem__"),
                        AccessElement::Call(CallElement {
                            location: call_location,
                            arguments: vec![CallArgument::positional(index)],
                        }),
                    ],
                    location,
                ));
            }
            AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                ExpressionKind::Starred(Starred::Once(Box::new(self.parse_expression(*value)?)))
            }
            AstExpr::Name(ast::ExprName { id, .. }) => {
                ExpressionKind::Access(Access::name(id.to_string()))
            }
            AstExpr::Slice(ast::ExprSlice {
                lower, upper, step, range, ..
            }) => {
                // `a[1:2]` carries `slice(1, 2, None)` as its index.
                let call_location = self.convert_range(range);
                let mut bound = |expression: Option<Box<AstExpr>>| -> Result<Expression, ParseError> {
                    match expression {
                        Some(expression) => self.parse_expression(*expression),
                        None => Ok(Expression::new(call_location, ExpressionKind::Name("None".to_owned()))),
                    }
                };
                let arguments = vec![
                    CallArgument::positional(bound(lower)?),
                    CallArgument::positional(bound(upper)?),
                    CallArgument::positional(bound(step)?),
                ];
                ExpressionKind::Access(Access::Simple(vec![
                    AccessElement::identifier("slice"),
                    AccessElement::Call(CallElement {
                        location: call_location,
                        arguments,
                    }),
                ]))
            }
            AstExpr::IpyEscapeCommand(_) => {
                return Err(ParseError::unsupported("IPython escape commands", location));
            }
        };
        Ok(Expression::new(location, kind))
    }

    fn parse_expressions(&mut self, expressions: Vec<AstExpr>) -> Result<Vec<Expression>, ParseError> {
        expressions
            .into_iter()
            .map(|expression| self.parse_expression(expression))
            .collect()
    }

    fn parse_keyword(&mut self, keyword: Keyword) -> Result<CallArgument, ParseError> {
        let value = self.parse_expression(keyword.value)?;
        match keyword.arg {
            Some(name) => Ok(CallArgument::named(name.id.to_string(), value)),
            None => Ok(CallArgument::positional(Expression::new(
                value.location,
                ExpressionKind::Starred(Starred::Twice(Box::new(value))),
            ))),
        }
    }

    /// The store form of a subscript target: `d[k] = v` carries
    /// `d.__setitem__(k, v)` as the statement's effective call.
    fn subscript_store(&mut self, subscript: ast::ExprSubscript, value: Expression) -> Result<Expression, ParseError> {
        let ast::ExprSubscript {
            value: base, slice, range, ..
        } = subscript;
        let location = self.convert_range(range);
        let base = self.parse_expression(*base)?;
        let index = self.parse_expression(*slice)?;
        Ok(append_to_access(
            base,
            vec![
                AccessElement::identifier("__setitem__"),
                AccessElement::Call(CallElement {
                    location,
                    arguments: vec![CallArgument::positional(index), CallArgument::positional(value)],
                }),
            ],
            location,
        ))
    }

    /// The delete form of a subscript target: `del d[k]` carries
    /// `d.__delitem__(k)`.
    fn subscript_delete(&mut self, subscript: ast::ExprSubscript) -> Result<Expression, ParseError> {
        let ast::ExprSubscript {
            value: base, slice, range, ..
        } = subscript;
        let location = self.convert_range(range);
        let base = self.parse_expression(*base)?;
        let index = self.parse_expression(*slice)?;
        Ok(append_to_access(
            base,
            vec![
                AccessElement::identifier("__delitem__"),
                AccessElement::Call(CallElement {
                    location,
                    arguments: vec![CallArgument::positional(index)],
                }),
            ],
            location,
        ))
    }

    fn parse_generators(&mut self, generators: Vec<ast::Comprehension>) -> Result<Vec<Comprehension>, ParseError> {
        generators
            .into_iter()
            .map(|generator| {
                Ok(Comprehension {
                    target: self.parse_expression(generator.target)?,
                    iterator: self.parse_expression(generator.iter)?,
                    conditions: self.parse_expressions(generator.ifs)?,
                    is_async: generator.is_async,
                })
            })
            .collect()
    }

    fn parse_parameters(&mut self, parameters: &ast::Parameters) -> Result<Vec<Parameter>, ParseError> {
        let mut lowered = Vec::new();
        self.parse_parameters_with_defaults(&parameters.posonlyargs, &mut lowered)?;
        self.parse_parameters_with_defaults(&parameters.args, &mut lowered)?;
        if let Some(vararg) = &parameters.vararg {
            lowered.push(Parameter {
                location: self.convert_range(vararg.range()),
                name: format!("*{}", vararg.name.id),
                value: None,
                annotation: vararg
                    .annotation
                    .as_ref()
                    .map(|annotation| self.parse_expression((**annotation).clone()))
                    .transpose()?,
            });
        }
        self.parse_parameters_with_defaults(&parameters.kwonlyargs, &mut lowered)?;
        if let Some(kwarg) = &parameters.kwarg {
            lowered.push(Parameter {
                location: self.convert_range(kwarg.range()),
                name: format!("**{}", kwarg.name.id),
                value: None,
                annotation: kwarg
                    .annotation
                    .as_ref()
                    .map(|annotation| self.parse_expression((**annotation).clone()))
                    .transpose()?,
            });
        }
        Ok(lowered)
    }

    fn parse_parameters_with_defaults(
        &mut self,
        parameters: &[ParameterWithDefault],
        lowered: &mut Vec<Parameter>,
    ) -> Result<(), ParseError> {
        for parameter in parameters {
            lowered.push(Parameter {
                location: self.convert_range(parameter.range()),
                name: parameter.parameter.name.id.to_string(),
                value: parameter
                    .default
                    .as_ref()
                    .map(|default| self.parse_expression((**default).clone()))
                    .transpose()?,
                annotation: parameter
                    .parameter
                    .annotation
                    .as_ref()
                    .map(|annotation| self.parse_expression((**annotation).clone()))
                    .transpose()?,
            });
        }
        Ok(())
    }

    /// Lowers an f-string (or an implicit concatenation involving one) into
    /// a `Mixed` string of raw substrings. The brace syntax inside format
    /// fragments is deliberately left unscanned — the format-string pass
    /// owns that state machine — so fragments carry the exact source slice
    /// between the quotes.
    fn parse_format_string(&mut self, value: &ast::FStringValue) -> Result<ExpressionKind, ParseError> {
        let mut substrings = Vec::new();
        for part in value {
            match part {
                ast::FStringPart::Literal(literal) => {
                    substrings.push(Substring {
                        kind: SubstringKind::Literal,
                        location: self.convert_range(literal.range()),
                        value: literal.value.to_string(),
                    });
                }
                ast::FStringPart::FString(fstring) => {
                    let range = fstring.range();
                    let (content_start, content_end) = string_content_span(self.code, range);
                    substrings.push(Substring {
                        kind: SubstringKind::Format,
                        location: self.convert_span(content_start, content_end),
                        value: self.code[content_start..content_end].to_owned(),
                    });
                }
            }
        }
        let value = substrings
            .iter()
            .map(|substring| substring.value.as_str())
            .collect::<String>();
        Ok(ExpressionKind::String(StringLiteral {
            value,
            kind: StringKind::Mixed(substrings),
        }))
    }
}

/// Re-parses an embedded fragment (a string annotation or an f-string
/// substitution) as a single expression, originating positions at the
/// fragment's own location.
pub fn parse_fragment(
    parser: &dyn Parse,
    text: &str,
    start_line: usize,
    start_column: usize,
    handle: Handle,
) -> Result<Expression, String> {
    let statements = parser
        .parse(text, start_line, start_column, handle)
        .map_err(|error| error.to_string())?;
    let mut statements = statements.into_iter();
    match (statements.next(), statements.next()) {
        (Some(statement), None) => match statement.kind {
            StatementKind::Expression(expression) => Ok(expression),
            _ => Err("fragment is not an expression".to_owned()),
        },
        _ => Err("fragment is not a single expression".to_owned()),
    }
}

/// Extends an access chain, or wraps a non-access base into an
/// expression access.
fn append_to_access(base: Expression, mut elements: Vec<AccessElement>, location: Location) -> Expression {
    let kind = match base.kind {
        ExpressionKind::Access(Access::Simple(mut existing)) => {
            existing.append(&mut elements);
            ExpressionKind::Access(Access::Simple(existing))
        }
        ExpressionKind::Access(Access::Expression(ExpressionAccess {
            expression,
            access: mut existing,
        })) => {
            existing.append(&mut elements);
            ExpressionKind::Access(Access::Expression(ExpressionAccess {
                expression,
                access: existing,
            }))
        }
        other => ExpressionKind::Access(Access::Expression(ExpressionAccess {
            expression: Box::new(Expression::new(base.location, other)),
            access: elements,
        })),
    };
    Expression::new(location, kind)
}

/// The docstring of a class or define body: a leading plain-string
/// expression statement. The statement itself stays in the body.
fn docstring_of(body: &[Statement]) -> Option<String> {
    match body.first().map(|statement| &statement.kind) {
        Some(StatementKind::Expression(Expression {
            kind:
                ExpressionKind::String(StringLiteral {
                    value,
                    kind: StringKind::Raw,
                }),
            ..
        })) => Some(value.clone()),
        _ => None,
    }
}

/// Byte span of the text between the quotes of a string token, skipping the
/// prefix letters and matching triple quotes.
fn string_content_span(code: &str, range: TextRange) -> (usize, usize) {
    let start: usize = range.start().into();
    let end: usize = range.end().into();
    let token = &code[start..end];
    let Some(quote_offset) = token.find(['"', '\'']) else {
        return (start, end);
    };
    let quote = token.as_bytes()[quote_offset];
    let is_triple = token.len() >= quote_offset + 6
        && token.as_bytes()[quote_offset + 1] == quote
        && token.as_bytes()[quote_offset + 2] == quote;
    let quote_len = if is_triple { 3 } else { 1 };
    (start + quote_offset + quote_len, end - quote_len)
}

fn convert_operator(operator: AstOperator) -> BinaryOperator {
    match operator {
        AstOperator::Add => BinaryOperator::Add,
        AstOperator::Sub => BinaryOperator::Subtract,
        AstOperator::Mult => BinaryOperator::Multiply,
        AstOperator::MatMult => BinaryOperator::MatrixMultiply,
        AstOperator::Div => BinaryOperator::Divide,
        AstOperator::Mod => BinaryOperator::Modulo,
        AstOperator::Pow => BinaryOperator::Power,
        AstOperator::LShift => BinaryOperator::LeftShift,
        AstOperator::RShift => BinaryOperator::RightShift,
        AstOperator::BitOr => BinaryOperator::BitOr,
        AstOperator::BitXor => BinaryOperator::BitXor,
        AstOperator::BitAnd => BinaryOperator::BitAnd,
        AstOperator::FloorDiv => BinaryOperator::FloorDivide,
    }
}

fn convert_comparison(operator: CmpOp) -> ComparisonOperator {
    match operator {
        CmpOp::Eq => ComparisonOperator::Equals,
        CmpOp::NotEq => ComparisonOperator::NotEquals,
        CmpOp::Lt => ComparisonOperator::LessThan,
        CmpOp::LtE => ComparisonOperator::LessThanOrEquals,
        CmpOp::Gt => ComparisonOperator::GreaterThan,
        CmpOp::GtE => ComparisonOperator::GreaterThanOrEquals,
        CmpOp::Is => ComparisonOperator::Is,
        CmpOp::IsNot => ComparisonOperator::IsNot,
        CmpOp::In => ComparisonOperator::In,
        CmpOp::NotIn => ComparisonOperator::NotIn,
    }
}

/// Parses an integer literal that overflows `i64`, handling radix prefixes
/// and underscore separators.
fn parse_int_literal(literal: &str) -> Option<BigInt> {
    let cleaned: String = literal.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.as_str();
    if cleaned.len() >= 2 {
        let prefix = &cleaned[..2];
        let digits = &cleaned[2..];
        match prefix.to_ascii_lowercase().as_str() {
            "0x" => return BigInt::parse_bytes(digits.as_bytes(), 16),
            "0o" => return BigInt::parse_bytes(digits.as_bytes(), 8),
            "0b" => return BigInt::parse_bytes(digits.as_bytes(), 2),
            _ => {}
        }
    }
    cleaned.parse::<BigInt>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_single(code: &str) -> Statement {
        let parser = RuffParser::new();
        let mut handles = HandleTable::new();
        let source = parser.parse_source(code, "test.py", "test", &mut handles).expect("parse");
        source.statements.into_iter().next().expect("one statement")
    }

    #[test]
    fn binary_operators_lower_to_dunder_accesses() {
        let statement = parse_single("a + b\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "a.__add__(b)");
    }

    #[test]
    fn subscripts_lower_to_getitem() {
        let statement = parse_single("d[k]\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__getitem__(k)");
    }

    #[test]
    fn slices_lower_through_slice_calls() {
        let statement = parse_single("d[1:2]\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__getitem__(slice(1, 2, None))");
    }

    #[test]
    fn augmented_assignment_lowers_to_inplace_dunder() {
        let statement = parse_single("x += 1\n");
        let StatementKind::Assign(assign) = &statement.kind else {
            panic!("expected assignment");
        };
        assert_eq!(assign.value.as_ref().expect("value").to_string(), "x.__iadd__(1)");
    }

    #[test]
    fn subscript_assignment_targets_lower_to_setitem() {
        let statement = parse_single("d[k] = v\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__setitem__(k, v)");
    }

    #[test]
    fn augmented_subscript_assignments_read_then_store() {
        let statement = parse_single("d[k] += v\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__setitem__(k, d.__getitem__(k).__iadd__(v))");
    }

    #[test]
    fn subscript_deletes_lower_to_delitem() {
        let statement = parse_single("del d[k]\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__delitem__(k)");
    }

    #[test]
    fn mixed_delete_targets_flatten_per_target() {
        let parser = RuffParser::new();
        let mut handles = HandleTable::new();
        let source = parser
            .parse_source("del x, d[k]\n", "test.py", "test", &mut handles)
            .expect("parse");
        assert_eq!(source.statements.len(), 2);
        assert!(matches!(source.statements[0].kind, StatementKind::Delete(_)));
        let StatementKind::Expression(expression) = &source.statements[1].kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "d.__delitem__(k)");
    }

    #[test]
    fn chained_calls_stay_in_one_access() {
        let statement = parse_single("B().foo()\n");
        let StatementKind::Expression(expression) = &statement.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expression.to_string(), "B().foo()");
    }

    #[test]
    fn format_strings_keep_raw_fragments() {
        let statement = parse_single("f\"a{b}c\"\n");
        let StatementKind::Expression(Expression {
            kind: ExpressionKind::String(literal),
            ..
        }) = &statement.kind
        else {
            panic!("expected string literal");
        };
        let StringKind::Mixed(substrings) = &literal.kind else {
            panic!("expected mixed string");
        };
        assert_eq!(substrings.len(), 1);
        assert_eq!(substrings[0].kind, SubstringKind::Format);
        assert_eq!(substrings[0].value, "a{b}c");
        assert_eq!(substrings[0].location.start.column, 2);
    }

    #[test]
    fn relative_imports_keep_their_dots() {
        let statement = parse_single("from ..a import b\n");
        let StatementKind::Import(import) = &statement.kind else {
            panic!("expected import");
        };
        assert_eq!(import.from.as_ref().expect("from").names(), ["..", "a"]);
    }

    #[test]
    fn reparse_offsets_positions_to_the_origin() {
        let parser = RuffParser::new();
        let mut handles = HandleTable::new();
        let handle = handles.intern("test.py");
        let statements = parser.parse("List[int]", 7, 12, handle).expect("parse");
        assert_eq!(statements[0].location.start.line, 7);
        assert_eq!(statements[0].location.start.column, 12);
    }

    #[test]
    fn match_statements_are_unsupported() {
        let parser = RuffParser::new();
        let mut handles = HandleTable::new();
        let error = parser
            .parse_source("match x:\n    case 1:\n        pass\n", "test.py", "test", &mut handles)
            .expect_err("match should be rejected");
        assert!(matches!(error, ParseError::Unsupported { .. }));
    }
}
