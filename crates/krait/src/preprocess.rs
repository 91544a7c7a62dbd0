//! The normalization pipeline.
//!
//! Eleven passes rewrite a freshly parsed source into the canonical form
//! the type checker and the call-graph engine consume. The order is
//! mandatory: each pass relies on invariants established by the ones
//! before it (string annotations must be expressions before qualification,
//! qualification must have run before TypedDict declarations are matched,
//! and so on).
//!
//! Passes are pure `Source -> Source` functions. The only external calls
//! are parser re-entry (string annotations, f-string fragments) and the
//! module-export lookups of the wildcard pass.

use indexmap::IndexMap;

use crate::{
    ast::{
        Access, AccessElement, Assign, CallArgument, CallElement, Class, ComparisonOperator, Define, DictionaryEntry,
        Expression, ExpressionAccess, ExpressionKind, If, Import, ImportEntry, Reference, Source, Statement,
        StatementKind, StringKind, StringLiteral, Substring, SubstringKind, Try, While,
    },
    environment::ModuleExports,
    location::{Handle, Location},
    parse::{Parse, parse_fragment},
    qualify::qualify,
    tracer::{NoopTracer, PipelineTracer},
    visit::{StatementTransform, Transform, collect_statements, transform_source, transform_statements},
};

/// The platform the analysis assumes when folding `sys.platform` tests.
const ANALYSIS_PLATFORM: &str = "linux";

/// Recoverable conditions surfaced across passes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    /// A `from M import *` could not be expanded because `M` has not been
    /// indexed yet. Callers defer and retry once exports are known.
    #[error("wildcard import from `{qualifier}` cannot be expanded before the module is indexed")]
    MissingWildcardImport { qualifier: Reference },
}

/// Runs the full pipeline eagerly; unexpandable wildcard imports are left
/// in place.
pub fn preprocess(source: Source, parser: &dyn Parse, exports: &ModuleExports) -> Source {
    preprocess_traced(source, parser, exports, &mut NoopTracer)
}

/// [`preprocess`] with an explicit tracer for degradation events.
pub fn preprocess_traced<T: PipelineTracer>(
    source: Source,
    parser: &dyn Parse,
    exports: &ModuleExports,
    tracer: &mut T,
) -> Source {
    match run_pipeline(source, parser, exports, tracer, true) {
        Ok(source) => source,
        Err(PreprocessError::MissingWildcardImport { .. }) => {
            unreachable!("forced wildcard expansion never defers")
        }
    }
}

/// Runs the full pipeline lazily: returns `None` when a required wildcard
/// import has not been indexed, so the caller can retry later.
pub fn try_preprocess(source: Source, parser: &dyn Parse, exports: &ModuleExports) -> Option<Source> {
    try_preprocess_traced(source, parser, exports, &mut NoopTracer)
}

/// [`try_preprocess`] with an explicit tracer.
pub fn try_preprocess_traced<T: PipelineTracer>(
    source: Source,
    parser: &dyn Parse,
    exports: &ModuleExports,
    tracer: &mut T,
) -> Option<Source> {
    run_pipeline(source, parser, exports, tracer, false).ok()
}

fn run_pipeline<T: PipelineTracer>(
    source: Source,
    parser: &dyn Parse,
    exports: &ModuleExports,
    tracer: &mut T,
    force_wildcards: bool,
) -> Result<Source, PreprocessError> {
    let source = expand_relative_imports(source);
    let source = expand_string_annotations(source, parser, tracer);
    let source = expand_format_string(source, parser, tracer);
    let source = replace_platform_specific_code(source);
    let source = replace_version_specific_code(source);
    let source = expand_type_checking_imports(source);
    let source = expand_wildcard_imports(source, exports, force_wildcards)?;
    let source = qualify(source, parser, tracer);
    let source = expand_implicit_returns(source);
    let source = replace_mypy_extensions_stub(source);
    let source = expand_typed_dictionary_declarations(source);
    Ok(source)
}

// ---------------------------------------------------------------------------
// Pass 1: relative imports.

struct ExpandRelativeImports {
    qualifier: Reference,
}

impl StatementTransform for ExpandRelativeImports {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::Import(import) = &statement.kind else {
            return vec![statement];
        };
        let Some(from) = &import.from else {
            return vec![statement];
        };
        let Some(head) = from.names().first() else {
            return vec![statement];
        };
        if !head.chars().all(|c| c == '.') || head.is_empty() {
            return vec![statement];
        }
        let level = head.len();
        let qualifier = self.qualifier.names();
        let base = &qualifier[..qualifier.len().saturating_sub(level)];
        let mut resolved: Vec<String> = base.to_vec();
        resolved.extend(from.names()[1..].iter().cloned());
        let resolved = Reference::new(resolved);
        if resolved.to_string() == "builtins" || resolved.to_string() == "future.builtins" {
            return vec![statement];
        }
        let kind = StatementKind::Import(Import {
            from: Some(resolved),
            imports: import.imports.clone(),
        });
        vec![statement.with_kind(kind)]
    }
}

/// Resolves `from .x import y` against the source's qualifier.
pub fn expand_relative_imports(source: Source) -> Source {
    let mut transformer = ExpandRelativeImports {
        qualifier: source.qualifier.clone(),
    };
    transform_statements(&mut transformer, source)
}

// ---------------------------------------------------------------------------
// Pass 2: string annotations.

struct ExpandStringAnnotations<'a, T: PipelineTracer> {
    parser: &'a dyn Parse,
    tracer: &'a mut T,
    handle: Handle,
}

impl<T: PipelineTracer> ExpandStringAnnotations<'_, T> {
    /// Parses a string annotation at its own source position; failures
    /// degrade to the `$unparsed_annotation` sentinel.
    fn parse_annotation(&mut self, location: Location, value: &str) -> Expression {
        match parse_fragment(
            self.parser,
            value,
            location.start.line,
            location.start.column + 1,
            self.handle,
        ) {
            Ok(expression) => self.transform_annotation(expression),
            Err(message) => {
                self.tracer.on_unparsed_annotation(location, value, &message);
                Expression::new(location, ExpressionKind::Access(Access::name("$unparsed_annotation")))
            }
        }
    }

    /// Replaces string literals inside an annotation expression. Call
    /// arguments under a `Literal[...]` head are values, not types, and are
    /// left alone.
    fn transform_annotation(&mut self, expression: Expression) -> Expression {
        let kind = match expression.kind.clone() {
            ExpressionKind::String(StringLiteral {
                value,
                kind: StringKind::Raw,
            }) => return self.parse_annotation(expression.location, &value),
            ExpressionKind::Access(Access::Simple(elements)) => {
                ExpressionKind::Access(Access::Simple(self.transform_annotation_elements(elements)))
            }
            ExpressionKind::Access(Access::Expression(ExpressionAccess {
                expression: base,
                access,
            })) => ExpressionKind::Access(Access::Expression(ExpressionAccess {
                expression: Box::new(self.transform_annotation(*base)),
                access: self.transform_annotation_elements(access),
            })),
            ExpressionKind::Tuple(items) => ExpressionKind::Tuple(
                items
                    .into_iter()
                    .map(|item| self.transform_annotation(item))
                    .collect(),
            ),
            ExpressionKind::List(items) => ExpressionKind::List(
                items
                    .into_iter()
                    .map(|item| self.transform_annotation(item))
                    .collect(),
            ),
            other => other,
        };
        expression.with_kind(kind)
    }

    fn transform_annotation_elements(&mut self, elements: Vec<AccessElement>) -> Vec<AccessElement> {
        let mut transformed: Vec<AccessElement> = Vec::with_capacity(elements.len());
        for element in elements {
            let in_literal = transformed
                .iter()
                .rev()
                .find_map(AccessElement::as_identifier)
                .is_some_and(|name| name == "Literal");
            match element {
                AccessElement::Call(call) if !in_literal => {
                    transformed.push(AccessElement::Call(CallElement {
                        location: call.location,
                        arguments: call
                            .arguments
                            .into_iter()
                            .map(|argument| CallArgument {
                                name: argument.name,
                                value: self.transform_annotation(argument.value),
                            })
                            .collect(),
                    }));
                }
                other => transformed.push(other),
            }
        }
        transformed
    }
}

/// The index of the `cast` identifier when `elements` is a
/// `cast(...)`/`typing.cast(...)` call.
fn cast_call_index(elements: &[AccessElement]) -> Option<usize> {
    for (index, pair) in elements.windows(2).enumerate() {
        if pair[0].as_identifier() == Some("cast") && matches!(pair[1], AccessElement::Call(_)) {
            let prefix_ok = match index {
                0 => true,
                1 => elements[0].as_identifier() == Some("typing"),
                _ => false,
            };
            if prefix_ok {
                return Some(index);
            }
        }
    }
    None
}

impl<T: PipelineTracer> Transform for ExpandStringAnnotations<'_, T> {
    fn transform_expression(&mut self, expression: Expression) -> Expression {
        let ExpressionKind::Access(Access::Simple(elements)) = &expression.kind else {
            return expression;
        };
        let Some(cast_index) = cast_call_index(elements) else {
            return expression;
        };
        let mut elements = elements.clone();
        if let AccessElement::Call(call) = &mut elements[cast_index + 1]
            && let Some(first) = call.arguments.first_mut()
        {
            first.value = self.transform_annotation(first.value.clone());
        }
        expression.with_kind(ExpressionKind::Access(Access::Simple(elements)))
    }

    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let kind = match statement.kind.clone() {
            StatementKind::Assign(mut assign) => {
                assign.annotation = assign
                    .annotation
                    .map(|annotation| self.transform_annotation(annotation));
                StatementKind::Assign(assign)
            }
            StatementKind::Define(mut define) => {
                define.parameters = define
                    .parameters
                    .into_iter()
                    .map(|mut parameter| {
                        parameter.annotation = parameter
                            .annotation
                            .map(|annotation| self.transform_annotation(annotation));
                        parameter
                    })
                    .collect();
                define.return_annotation = define
                    .return_annotation
                    .map(|annotation| self.transform_annotation(annotation));
                StatementKind::Define(define)
            }
            other => other,
        };
        vec![statement.with_kind(kind)]
    }
}

/// Parses string literals in annotation position (assignment annotations,
/// parameter and return annotations, the type argument of `cast`).
pub fn expand_string_annotations<T: PipelineTracer>(source: Source, parser: &dyn Parse, tracer: &mut T) -> Source {
    let mut transformer = ExpandStringAnnotations {
        parser,
        tracer,
        handle: source.handle,
    };
    transform_source(&mut transformer, source)
}

// ---------------------------------------------------------------------------
// Pass 3: format strings.

struct ExpandFormatString<'a, T: PipelineTracer> {
    parser: &'a dyn Parse,
    tracer: &'a mut T,
    handle: Handle,
}

impl<T: PipelineTracer> ExpandFormatString<'_, T> {
    /// Scans one format substring for brace-delimited expressions.
    ///
    /// `{` in literal state opens an expression (recording its column); a
    /// second `{` before any content collapses back to literal (the `{{`
    /// escape); `}` hands the accumulated slice to the parser; leading
    /// blanks inside an empty expression are stripped. Braces nested inside
    /// an expression are not tracked — the accumulated slice simply fails to
    /// parse and is dropped.
    fn scan_substring(&mut self, substring: &Substring, expressions: &mut Vec<Expression>) {
        enum State {
            Literal,
            Expression { start: usize, value: String },
        }
        let mut state = State::Literal;
        for (index, character) in substring.value.char_indices() {
            state = match (state, character) {
                (State::Literal, '{') => State::Expression {
                    start: index + 1,
                    value: String::new(),
                },
                (State::Expression { value, .. }, '{') if value.is_empty() => State::Literal,
                (State::Expression { start, value }, '}') => {
                    self.parse_fragment_at(substring, start, &value, expressions);
                    State::Literal
                }
                (State::Expression { value, .. }, ' ' | '\t') if value.is_empty() => State::Expression {
                    start: index + 1,
                    value,
                },
                (State::Expression { start, mut value }, character) => {
                    value.push(character);
                    State::Expression { start, value }
                }
                (State::Literal, _) => State::Literal,
            };
        }
    }

    fn parse_fragment_at(
        &mut self,
        substring: &Substring,
        position: usize,
        value: &str,
        expressions: &mut Vec<Expression>,
    ) {
        if value.is_empty() {
            return;
        }
        let line = substring.location.start.line;
        let column = substring.location.start.column + position;
        match parse_fragment(self.parser, value, line, column, self.handle) {
            Ok(expression) => expressions.push(expression),
            Err(message) => {
                self.tracer
                    .on_dropped_format_fragment(substring.location, value, &message);
            }
        }
    }
}

impl<T: PipelineTracer> Transform for ExpandFormatString<'_, T> {
    fn transform_expression(&mut self, expression: Expression) -> Expression {
        let ExpressionKind::String(StringLiteral {
            value,
            kind: StringKind::Mixed(substrings),
        }) = &expression.kind
        else {
            return expression;
        };
        let mut expressions = Vec::new();
        for substring in substrings {
            if substring.kind == SubstringKind::Format {
                self.scan_substring(substring, &mut expressions);
            }
        }
        expression.with_kind(ExpressionKind::String(StringLiteral {
            value: value.clone(),
            kind: StringKind::Format(expressions),
        }))
    }
}

/// Extracts the substitution expressions of every f-string, turning `Mixed`
/// strings into `Format` ones. The original text is retained for
/// diagnostics.
pub fn expand_format_string<T: PipelineTracer>(source: Source, parser: &dyn Parse, tracer: &mut T) -> Source {
    let mut transformer = ExpandFormatString {
        parser,
        tracer,
        handle: source.handle,
    };
    transform_source(&mut transformer, source)
}

// ---------------------------------------------------------------------------
// Passes 4-6: constant folding of platform, version, and TYPE_CHECKING
// conditionals.

fn simple_access_text(expression: &Expression) -> Option<String> {
    match &expression.kind {
        ExpressionKind::Access(access @ Access::Simple(_)) => access.as_reference().map(|reference| reference.to_string()),
        _ => None,
    }
}

fn single_comparison(test: &Expression) -> Option<(&Expression, ComparisonOperator, &Expression)> {
    let ExpressionKind::ComparisonOperator { left, comparisons } = &test.kind else {
        return None;
    };
    match comparisons.as_slice() {
        [(operator, right)] => Some((left, *operator, right)),
        _ => None,
    }
}

fn branch_or_pass(branch: Vec<Statement>, location: Location) -> Vec<Statement> {
    if branch.is_empty() {
        vec![Statement::synthetic(location, StatementKind::Pass)]
    } else {
        branch
    }
}

struct ReplacePlatformSpecificCode;

impl StatementTransform for ReplacePlatformSpecificCode {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::If(If { test, body, orelse }) = &statement.kind else {
            return vec![statement];
        };
        let Some((left, operator, right)) = single_comparison(test) else {
            return vec![statement];
        };
        let compared = if simple_access_text(left).as_deref() == Some("sys.platform") {
            string_literal_value(right)
        } else if simple_access_text(right).as_deref() == Some("sys.platform") {
            string_literal_value(left)
        } else {
            None
        };
        let Some(compared) = compared else {
            return vec![statement];
        };
        let matches = compared == ANALYSIS_PLATFORM;
        let take_body = match operator {
            ComparisonOperator::Equals | ComparisonOperator::Is => matches,
            ComparisonOperator::NotEquals | ComparisonOperator::IsNot => !matches,
            _ => return vec![statement],
        };
        let branch = if take_body { body.clone() } else { orelse.clone() };
        branch_or_pass(branch, statement.location)
    }
}

fn string_literal_value(expression: &Expression) -> Option<String> {
    match &expression.kind {
        ExpressionKind::String(StringLiteral {
            value,
            kind: StringKind::Raw,
        }) => Some(value.clone()),
        _ => None,
    }
}

/// Folds `if sys.platform == "…"` conditionals against the analysis
/// platform.
pub fn replace_platform_specific_code(source: Source) -> Source {
    transform_statements(&mut ReplacePlatformSpecificCode, source)
}

/// The `sys.version_info` side of a version comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionOperand {
    /// `sys.version_info`
    Full,
    /// `sys.version_info[0]`
    MajorComponent,
}

fn version_operand(expression: &Expression) -> Option<VersionOperand> {
    let ExpressionKind::Access(Access::Simple(elements)) = &expression.kind else {
        return None;
    };
    let identifiers: Vec<&str> = elements.iter().filter_map(AccessElement::as_identifier).collect();
    match identifiers.as_slice() {
        ["sys", "version_info"] | ["version_info"] => match elements.last() {
            Some(AccessElement::Identifier(_)) => Some(VersionOperand::Full),
            Some(AccessElement::Call(call)) => {
                let subscript_zero = identifiers.last() == Some(&"__getitem__")
                    && matches!(
                        call.arguments.as_slice(),
                        [CallArgument { name: None, value }] if is_integer(value, 0)
                    );
                subscript_zero.then_some(VersionOperand::MajorComponent)
            }
            None => None,
        },
        ["sys", "version_info", "__getitem__"] | ["version_info", "__getitem__"] => match elements.last() {
            Some(AccessElement::Call(call)) => matches!(
                call.arguments.as_slice(),
                [CallArgument { name: None, value }] if is_integer(value, 0)
            )
            .then_some(VersionOperand::MajorComponent),
            _ => None,
        },
        _ => None,
    }
}

fn is_integer(expression: &Expression, expected: i64) -> bool {
    matches!(&expression.kind, ExpressionKind::Integer(value) if *value == num_bigint::BigInt::from(expected))
}

/// Whether the expression is the literal `3` or a tuple beginning with `3`.
fn is_major_three_literal(expression: &Expression) -> bool {
    match &expression.kind {
        ExpressionKind::Integer(_) => is_integer(expression, 3),
        ExpressionKind::Tuple(items) => items.first().is_some_and(|item| is_integer(item, 3)),
        _ => false,
    }
}

struct ReplaceVersionSpecificCode;

impl StatementTransform for ReplaceVersionSpecificCode {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::If(If { test, body, orelse }) = &statement.kind else {
            return vec![statement];
        };
        let Some((left, operator, right)) = single_comparison(test) else {
            return vec![statement];
        };
        // Equality never pins the analysis to a specific runtime version.
        if operator == ComparisonOperator::Equals
            && (version_operand(left).is_some() || version_operand(right).is_some())
            && (is_major_three_literal(left) || is_major_three_literal(right))
        {
            return branch_or_pass(orelse.clone(), statement.location);
        }
        // Normalize the comparison into a `(small, large)` pair.
        let (small, large) = match operator {
            ComparisonOperator::LessThan | ComparisonOperator::LessThanOrEquals => (left, right),
            ComparisonOperator::GreaterThan | ComparisonOperator::GreaterThanOrEquals => (right, left),
            _ => return vec![statement],
        };
        let branch = if version_operand(small).is_some() && is_major_three_literal(large) {
            // `version_info < (3, …)` never holds for the analysis runtime.
            orelse.clone()
        } else if is_major_three_literal(small) && version_operand(large).is_some() {
            body.clone()
        } else {
            return vec![statement];
        };
        branch_or_pass(branch, statement.location)
    }
}

/// Folds `sys.version_info` comparisons against the Python 3 line.
pub fn replace_version_specific_code(source: Source) -> Source {
    transform_statements(&mut ReplaceVersionSpecificCode, source)
}

struct ExpandTypeCheckingImports;

impl StatementTransform for ExpandTypeCheckingImports {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::If(If { test, body, .. }) = &statement.kind else {
            return vec![statement];
        };
        match simple_access_text(test).as_deref() {
            Some("TYPE_CHECKING" | "typing.TYPE_CHECKING") => body.clone(),
            _ => vec![statement],
        }
    }
}

/// Splices `if TYPE_CHECKING:` bodies unconditionally: the analysis always
/// sees checking-only imports.
pub fn expand_type_checking_imports(source: Source) -> Source {
    transform_statements(&mut ExpandTypeCheckingImports, source)
}

// ---------------------------------------------------------------------------
// Pass 7: wildcard imports.

struct ExpandWildcardImports<'a> {
    exports: &'a ModuleExports,
    force: bool,
    error: Option<PreprocessError>,
}

impl StatementTransform for ExpandWildcardImports<'_> {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::Import(import) = &statement.kind else {
            return vec![statement];
        };
        let Some(from) = &import.from else {
            return vec![statement];
        };
        if !import
            .imports
            .iter()
            .any(|entry| entry.name.last() == Some("*"))
        {
            return vec![statement];
        }
        match self.exports.get(from) {
            Some(exports) => {
                let imports = exports
                    .iter()
                    .map(|name| ImportEntry {
                        name: Reference::single(name.clone()),
                        alias: None,
                    })
                    .collect();
                vec![statement.with_kind(StatementKind::Import(Import {
                    from: Some(from.clone()),
                    imports,
                }))]
            }
            None => {
                if !self.force && self.error.is_none() {
                    self.error = Some(PreprocessError::MissingWildcardImport {
                        qualifier: from.clone(),
                    });
                }
                vec![statement]
            }
        }
    }
}

/// Rewrites `from M import *` through the module-export table. Unknown
/// modules either keep the star (`force`) or defer the whole source.
pub fn expand_wildcard_imports(
    source: Source,
    exports: &ModuleExports,
    force: bool,
) -> Result<Source, PreprocessError> {
    let mut transformer = ExpandWildcardImports {
        exports,
        force,
        error: None,
    };
    let source = transform_statements(&mut transformer, source);
    match transformer.error {
        Some(error) => Err(error),
        None => Ok(source),
    }
}

// ---------------------------------------------------------------------------
// Pass 9: implicit returns.

fn ends_in_return(statements: &[Statement]) -> bool {
    matches!(
        statements.last().map(|statement| &statement.kind),
        Some(StatementKind::Return { .. })
    )
}

fn body_terminates(define: &Define) -> bool {
    if ends_in_return(&define.body) || define.is_generator() {
        return true;
    }
    match define.body.last().map(|statement| &statement.kind) {
        Some(StatementKind::Try(Try { finally, .. })) => ends_in_return(finally),
        Some(StatementKind::While(While { test, .. })) => {
            matches!(test.kind, ExpressionKind::Boolean(true))
        }
        _ => false,
    }
}

struct ExpandImplicitReturns;

impl StatementTransform for ExpandImplicitReturns {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let StatementKind::Define(define) = &statement.kind else {
            return vec![statement];
        };
        if body_terminates(define) {
            return vec![statement];
        }
        let mut define = define.clone();
        let location = define
            .body
            .last()
            .map_or(statement.location, |statement| statement.location);
        define.body.push(Statement::synthetic(
            location,
            StatementKind::Return {
                expression: None,
                is_implicit: true,
            },
        ));
        vec![statement.with_kind(StatementKind::Define(define))]
    }
}

/// Appends a synthetic `return` to every function body that can fall off
/// the end.
pub fn expand_implicit_returns(source: Source) -> Source {
    transform_statements(&mut ExpandImplicitReturns, source)
}

// ---------------------------------------------------------------------------
// Passes 10-11: TypedDict canonicalization.

fn access_expression(location: Location, dotted: &str) -> Expression {
    Expression::new(
        location,
        ExpressionKind::Access(Reference::from_dotted(dotted).into()),
    )
}

fn string_expression(location: Location, value: &str) -> Expression {
    Expression::new(
        location,
        ExpressionKind::String(StringLiteral::plain(value.to_owned())),
    )
}

/// In the `mypy_extensions` stub itself, the `TypedDict` define becomes a
/// `_SpecialForm` binding so downstream phases treat it like the other
/// typing special forms.
pub fn replace_mypy_extensions_stub(source: Source) -> Source {
    if !source.metadata.path.ends_with("mypy_extensions.pyi") {
        return source;
    }
    let statements = source
        .statements
        .iter()
        .map(|statement| match &statement.kind {
            StatementKind::Define(define)
                if define.name_reference().last().map(crate::ast::sanitize_identifier).as_deref()
                    == Some("TypedDict") =>
            {
                statement.with_kind(StatementKind::Assign(Assign {
                    target: Expression::new(
                        statement.location,
                        ExpressionKind::Access(define.name.clone()),
                    ),
                    annotation: Some(access_expression(statement.location, "typing._SpecialForm")),
                    value: Some(Expression::new(statement.location, ExpressionKind::Ellipsis)),
                    parent: define.parent.clone(),
                }))
            }
            _ => statement.clone(),
        })
        .collect();
    source.with_statements(statements)
}

/// The canonical right-hand side of a TypedDict declaration: a subscript
/// call on `mypy_extensions.TypedDict.__getitem__` with the argument tuple
/// `(name, total, (k1, v1), …, (kn, vn))`.
fn typed_dictionary_value(
    location: Location,
    name: &str,
    total: bool,
    fields: Vec<(String, Expression)>,
) -> Expression {
    let mut arguments = vec![
        string_expression(location, name),
        Expression::new(location, ExpressionKind::Boolean(total)),
    ];
    for (field, annotation) in fields {
        arguments.push(Expression::new(
            location,
            ExpressionKind::Tuple(vec![string_expression(location, &field), annotation]),
        ));
    }
    Expression::new(
        location,
        ExpressionKind::Access(Access::Simple(vec![
            AccessElement::identifier("mypy_extensions"),
            AccessElement::identifier("TypedDict"),
            AccessElement::identifier("__getitem__"),
            AccessElement::Call(CallElement {
                location,
                arguments: vec![CallArgument::positional(Expression::new(
                    location,
                    ExpressionKind::Tuple(arguments),
                ))],
            }),
        ])),
    )
}

fn typed_dictionary_annotation(location: Location, value: &Expression) -> Expression {
    Expression::new(
        location,
        ExpressionKind::Access(Access::Simple(vec![
            AccessElement::identifier("typing"),
            AccessElement::identifier("Type"),
            AccessElement::identifier("__getitem__"),
            AccessElement::Call(CallElement {
                location,
                arguments: vec![CallArgument::positional(value.clone())],
            }),
        ])),
    )
}

/// Whether an expression is a (qualified) reference to
/// `mypy_extensions.TypedDict`, optionally followed by further elements.
fn typed_dict_prefix_length(elements: &[AccessElement]) -> Option<usize> {
    for index in 0..elements.len().saturating_sub(1) {
        if elements[index].as_identifier() == Some("mypy_extensions")
            && elements[index + 1].as_identifier() == Some("TypedDict")
        {
            return Some(index + 2);
        }
    }
    None
}

fn boolean_literal(expression: &Expression) -> Option<bool> {
    match &expression.kind {
        ExpressionKind::Boolean(value) => Some(*value),
        _ => None,
    }
}

struct ExpandTypedDictionaries;

impl ExpandTypedDictionaries {
    /// `X = mypy_extensions.TypedDict('X', {'k': int}, total=...)`.
    fn rewrite_assignment_form(statement: &Statement, assign: &Assign) -> Option<Statement> {
        let value = assign.value.as_ref()?;
        let ExpressionKind::Access(Access::Simple(elements)) = &value.kind else {
            return None;
        };
        let prefix = typed_dict_prefix_length(elements)?;
        let AccessElement::Call(call) = elements.get(prefix)? else {
            return None;
        };
        let mut positional = call.arguments.iter().filter(|argument| argument.name.is_none());
        let name = string_literal_value(&positional.next()?.value)?;
        let ExpressionKind::Dictionary(entries) = &positional.next()?.value.kind else {
            return None;
        };
        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            let DictionaryEntry::Pair { key, value } = entry else {
                return None;
            };
            fields.push((string_literal_value(key)?, value.clone()));
        }
        let total = call
            .arguments
            .iter()
            .find(|argument| {
                argument
                    .name
                    .as_deref()
                    .map(crate::ast::sanitize_identifier)
                    .as_deref()
                    == Some("total")
            })
            .and_then(|argument| boolean_literal(&argument.value))
            .unwrap_or(true);
        let location = statement.location;
        let value = typed_dictionary_value(location, &name, total, fields);
        Some(statement.with_kind(StatementKind::Assign(Assign {
            target: assign.target.clone(),
            annotation: Some(typed_dictionary_annotation(location, &value)),
            value: Some(value),
            parent: assign.parent.clone(),
        })))
    }

    /// `class X(mypy_extensions.TypedDict, total=False): k: int`.
    fn rewrite_class_form(statement: &Statement, class: &Class) -> Option<Statement> {
        let is_typed_dict_base = class.bases.iter().any(|base| {
            base.name.is_none()
                && matches!(
                    &base.value.kind,
                    ExpressionKind::Access(Access::Simple(elements))
                        if typed_dict_prefix_length(elements) == Some(elements.len())
                )
        });
        if !is_typed_dict_base {
            return None;
        }
        let name_reference = class.name.as_reference()?;
        let declaration_name = crate::ast::sanitize_identifier(name_reference.last()?);
        let total = class
            .bases
            .iter()
            .find(|base| base.name.as_deref() == Some("total"))
            .and_then(|base| boolean_literal(&base.value))
            .unwrap_or(true);
        let mut fields = Vec::new();
        for body_statement in &class.body {
            let StatementKind::Assign(Assign {
                target,
                annotation: Some(annotation),
                ..
            }) = &body_statement.kind
            else {
                continue;
            };
            let ExpressionKind::Access(access) = &target.kind else {
                continue;
            };
            let Some(field) = access.as_reference().and_then(|reference| {
                reference.last().map(crate::ast::sanitize_identifier)
            }) else {
                continue;
            };
            fields.push((field, annotation.clone()));
        }
        let location = statement.location;
        let value = typed_dictionary_value(location, &declaration_name, total, fields);
        Some(statement.with_kind(StatementKind::Assign(Assign {
            target: Expression::new(location, ExpressionKind::Access(class.name.clone())),
            annotation: Some(typed_dictionary_annotation(location, &value)),
            value: Some(value),
            parent: None,
        })))
    }
}

impl StatementTransform for ExpandTypedDictionaries {
    fn transform_statement(&mut self, statement: Statement) -> Vec<Statement> {
        let rewritten = match &statement.kind {
            StatementKind::Assign(assign) => Self::rewrite_assignment_form(&statement, assign),
            StatementKind::Class(class) => Self::rewrite_class_form(&statement, class),
            _ => None,
        };
        vec![rewritten.unwrap_or(statement)]
    }
}

/// Canonicalizes both TypedDict declaration forms into annotated
/// assignments over `mypy_extensions.TypedDict.__getitem__`.
pub fn expand_typed_dictionary_declarations(source: Source) -> Source {
    transform_statements(&mut ExpandTypedDictionaries, source)
}

// ---------------------------------------------------------------------------
// Queries over normalized sources.

/// Collects the defines of a source.
///
/// Stub bodies (`...`) are skipped unless `include_stubs`; defines nested
/// inside other defines are skipped unless `include_nested`;
/// `extract_into_toplevel` prepends a synthetic `$toplevel` define wrapping
/// the module statements.
pub fn defines(source: &Source, include_stubs: bool, include_nested: bool, extract_into_toplevel: bool) -> Vec<Statement> {
    let mut collected = Vec::new();
    if extract_into_toplevel {
        collected.push(toplevel_define(source));
    }
    let matched = collect_statements(
        &source.statements,
        |statement| statement.as_define().is_some(),
        |statement| include_nested || statement.as_define().is_none(),
    );
    for statement in matched {
        let define = statement.as_define().expect("collector matched defines only");
        if !include_stubs && define.is_stub() {
            continue;
        }
        collected.push(statement.clone());
    }
    collected
}

fn toplevel_define(source: &Source) -> Statement {
    let location = source
        .statements
        .first()
        .map_or_else(Location::default, |statement| statement.location);
    Statement::synthetic(
        location,
        StatementKind::Define(Define {
            name: source.qualifier.child("$toplevel").into(),
            parameters: Vec::new(),
            body: source.statements.clone(),
            decorators: Vec::new(),
            return_annotation: None,
            is_async: false,
            parent: None,
            docstring: None,
        }),
    )
}

/// Collects every class statement of a source.
pub fn classes(source: &Source) -> Vec<Statement> {
    collect_statements(&source.statements, |statement| statement.as_class().is_some(), |_| true)
        .cloned()
        .collect()
}

/// Builds the map from qualified names back to the source's chosen local
/// form, keyed by the *reversed* qualified reference for suffix matching.
pub fn dequalify_map(source: &Source) -> IndexMap<Reference, Reference> {
    let mut map = IndexMap::new();
    let imports = collect_statements(
        &source.statements,
        |statement| matches!(statement.kind, StatementKind::Import(_)),
        |_| true,
    );
    for statement in imports {
        let StatementKind::Import(import) = &statement.kind else {
            continue;
        };
        match &import.from {
            Some(from) => {
                for entry in &import.imports {
                    if entry.name.last() == Some("*") {
                        continue;
                    }
                    let qualified = from.join(&entry.name);
                    let local = entry
                        .alias
                        .as_ref()
                        .and_then(|alias| alias.last())
                        .or_else(|| entry.name.last());
                    if let Some(local) = local {
                        map.insert(qualified.reversed(), Reference::single(local.to_owned()));
                    }
                }
            }
            None => {
                for entry in &import.imports {
                    if let Some(alias) = &entry.alias {
                        map.insert(entry.name.reversed(), alias.clone());
                    }
                }
            }
        }
    }
    map
}
