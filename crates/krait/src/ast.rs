//! The Access-based abstract syntax tree.
//!
//! Names, member selections, and call chains share one representation: an
//! [`Access`] is an ordered sequence of identifier and call elements, so
//! `typing.cast(x)` is `[Identifier typing, Identifier cast, Call [x]]`.
//! Binary operators and subscripts lower into accesses on dunder methods at
//! parse time, which keeps the call surface uniform for the call-graph
//! phase. Trees are strict: an [`ExpressionAccess`] attaches a sub-tree to
//! an access chain as a sum variant, never as a back-pointer.
//!
//! Nodes are immutable once a pass has produced them; every normalization
//! pass consumes its input tree and yields a new one.

use std::fmt;

use num_bigint::BigInt;

use crate::location::Location;

/// Identifier of a statement node, assigned by the lowering.
///
/// The type-resolution store is keyed by `(define node id, statement
/// index)`; everything else ignores ids. Statements fabricated by
/// normalization passes use [`NodeId::SYNTHETIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const SYNTHETIC: Self = Self(0);
}

/// A plain name. Synthetic names injected by qualification carry a
/// `$local_…$`, `$parameter$`, or `$target$` wrapper.
pub type Identifier = String;

/// Strips the synthetic wrapper from an identifier, recovering the name the
/// user wrote. Non-synthetic names pass through unchanged.
#[must_use]
pub fn sanitize_identifier(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("$local_")
        && let Some(separator) = rest.find('$')
    {
        return rest[separator + 1..].to_owned();
    }
    if let Some(rest) = name.strip_prefix("$parameter$") {
        return rest.to_owned();
    }
    if let Some(rest) = name.strip_prefix("$target$") {
        return rest.to_owned();
    }
    name.to_owned()
}

/// An argument at a call site, optionally named.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallArgument {
    pub name: Option<Identifier>,
    pub value: Expression,
}

impl CallArgument {
    #[must_use]
    pub fn positional(value: Expression) -> Self {
        Self { name: None, value }
    }

    #[must_use]
    pub fn named(name: impl Into<Identifier>, value: Expression) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

/// The call element of an access chain: `f(...)`, `a.b(...)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallElement {
    pub location: Location,
    pub arguments: Vec<CallArgument>,
}

/// One element of an access chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AccessElement {
    Identifier(Identifier),
    Call(CallElement),
}

impl AccessElement {
    #[must_use]
    pub fn identifier(name: impl Into<Identifier>) -> Self {
        Self::Identifier(name.into())
    }

    #[must_use]
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Self::Identifier(name) => Some(name),
            Self::Call(_) => None,
        }
    }
}

/// An arbitrary expression followed by a trailing access chain, e.g.
/// `(lambda: 1)()` or `[1, 2].pop()`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionAccess {
    pub expression: Box<Expression>,
    pub access: Vec<AccessElement>,
}

/// A qualified name, member selection, or call chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Access {
    Simple(Vec<AccessElement>),
    Expression(ExpressionAccess),
}

impl Access {
    #[must_use]
    pub fn simple(elements: Vec<AccessElement>) -> Self {
        Self::Simple(elements)
    }

    /// A single-identifier access.
    #[must_use]
    pub fn name(name: impl Into<Identifier>) -> Self {
        Self::Simple(vec![AccessElement::Identifier(name.into())])
    }

    /// The identifier sequence of the access, if it contains no calls and no
    /// leading expression.
    #[must_use]
    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Self::Simple(elements) => {
                let mut names = Vec::with_capacity(elements.len());
                for element in elements {
                    names.push(element.as_identifier()?.to_owned());
                }
                Some(Reference::new(names))
            }
            Self::Expression(_) => None,
        }
    }

    /// The head identifier of a simple access.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self {
            Self::Simple(elements) => elements.first().and_then(AccessElement::as_identifier),
            Self::Expression(_) => None,
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<&AccessElement> {
        match self {
            Self::Simple(elements) => elements.last(),
            Self::Expression(access) => access.access.last(),
        }
    }

    /// Whether the access is a call site: its chain terminates in a call.
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.last(), Some(AccessElement::Call(_)))
    }
}

impl From<Reference> for Access {
    fn from(reference: Reference) -> Self {
        Self::Simple(reference.into_elements())
    }
}

/// An identifiers-only access, used for declared names: source qualifiers,
/// scope keys, and call-graph vertices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct Reference(Vec<Identifier>);

impl Reference {
    #[must_use]
    pub fn new(names: Vec<Identifier>) -> Self {
        Self(names)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Parses a dotted name, `"a.b.c"` becoming `[a, b, c]`.
    #[must_use]
    pub fn from_dotted(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::empty();
        }
        Self(dotted.split('.').map(str::to_owned).collect())
    }

    #[must_use]
    pub fn single(name: impl Into<Identifier>) -> Self {
        Self(vec![name.into()])
    }

    #[must_use]
    pub fn names(&self) -> &[Identifier] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// `self` extended with `name`, leaving `self` untouched.
    #[must_use]
    pub fn child(&self, name: impl Into<Identifier>) -> Self {
        let mut names = self.0.clone();
        names.push(name.into());
        Self(names)
    }

    /// `self` followed by all names of `suffix`.
    #[must_use]
    pub fn join(&self, suffix: &Self) -> Self {
        let mut names = self.0.clone();
        names.extend(suffix.0.iter().cloned());
        Self(names)
    }

    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut names = self.0.clone();
        names.reverse();
        Self(names)
    }

    #[must_use]
    pub fn into_elements(self) -> Vec<AccessElement> {
        self.0.into_iter().map(AccessElement::Identifier).collect()
    }

    /// Strips synthetic wrappers from every component.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self(self.0.iter().map(|name| sanitize_identifier(name)).collect())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// `and` / `or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BooleanOperator {
    And,
    Or,
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "and",
            Self::Or => "or",
        })
    }
}

/// Comparison operators, kept symbolic so normalization passes can fold
/// platform and version tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Is,
    IsNot,
    In,
    NotIn,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEquals => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEquals => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        })
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOperator {
    Invert,
    Negative,
    Not,
    Positive,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invert => "~",
            Self::Negative => "-",
            Self::Not => "not ",
            Self::Positive => "+",
        })
    }
}

/// Binary operators of the surface syntax. These never survive lowering —
/// `a + b` becomes `a.__add__(b)` — so the enum only exists to name the
/// dunder method for each operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum BinaryOperator {
    #[strum(serialize = "__add__")]
    Add,
    #[strum(serialize = "__sub__")]
    Subtract,
    #[strum(serialize = "__mul__")]
    Multiply,
    #[strum(serialize = "__matmul__")]
    MatrixMultiply,
    #[strum(serialize = "__truediv__")]
    Divide,
    #[strum(serialize = "__floordiv__")]
    FloorDivide,
    #[strum(serialize = "__mod__")]
    Modulo,
    #[strum(serialize = "__pow__")]
    Power,
    #[strum(serialize = "__lshift__")]
    LeftShift,
    #[strum(serialize = "__rshift__")]
    RightShift,
    #[strum(serialize = "__or__")]
    BitOr,
    #[strum(serialize = "__and__")]
    BitAnd,
    #[strum(serialize = "__xor__")]
    BitXor,
}

impl BinaryOperator {
    /// The dunder method the operator dispatches to.
    #[must_use]
    pub fn dunder(self) -> &'static str {
        self.into()
    }

    /// The in-place dunder for the augmented-assignment form (`+=`).
    #[must_use]
    pub fn inplace_dunder(self) -> String {
        let dunder = self.dunder();
        format!("__i{}", &dunder[2..])
    }
}

/// One entry of a dictionary literal, preserving source order. Literals may
/// mix `key: value` pairs with `**mapping` unpacking.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum DictionaryEntry {
    Pair { key: Expression, value: Expression },
    Unpack(Expression),
}

/// One `for … in … if …` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Comprehension {
    pub target: Expression,
    pub iterator: Expression,
    pub conditions: Vec<Expression>,
    pub is_async: bool,
}

/// A function or lambda parameter. Star parameters keep their prefix in the
/// name (`*args`, `**kwargs`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Parameter {
    pub location: Location,
    pub name: Identifier,
    pub value: Option<Expression>,
    pub annotation: Option<Expression>,
}

/// `*x` / `**x`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Starred {
    Once(Box<Expression>),
    Twice(Box<Expression>),
}

/// A fragment of an implicitly-concatenated string: plain text or the raw
/// body of an f-string, scanned for substitutions by the format-string
/// pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SubstringKind {
    Literal,
    Format,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Substring {
    pub kind: SubstringKind,
    pub location: Location,
    pub value: String,
}

/// How a string literal's contents are interpreted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StringKind {
    /// Plain text.
    Raw,
    /// An f-string whose substitutions have been extracted.
    Format(Vec<Expression>),
    /// Unscanned mix of literal and f-string fragments, as produced by the
    /// lowering. The format-string pass rewrites this into `Format`.
    Mixed(Vec<Substring>),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StringLiteral {
    pub value: String,
    pub kind: StringKind,
}

impl StringLiteral {
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: StringKind::Raw,
        }
    }
}

/// An expression with its location.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Expression {
    pub location: Location,
    pub kind: ExpressionKind,
}

impl Expression {
    #[must_use]
    pub fn new(location: Location, kind: ExpressionKind) -> Self {
        Self { location, kind }
    }

    /// Rebuilds the node around a new kind, keeping the location.
    #[must_use]
    pub fn with_kind(&self, kind: ExpressionKind) -> Self {
        Self {
            location: self.location,
            kind,
        }
    }

    #[must_use]
    pub fn access(&self) -> Option<&Access> {
        match &self.kind {
            ExpressionKind::Access(access) => Some(access),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExpressionKind {
    Access(Access),
    Await(Box<Expression>),
    Boolean(bool),
    BooleanOperator {
        left: Box<Expression>,
        operator: BooleanOperator,
        right: Box<Expression>,
    },
    ComparisonOperator {
        left: Box<Expression>,
        comparisons: Vec<(ComparisonOperator, Expression)>,
    },
    Complex(f64),
    Dictionary(Vec<DictionaryEntry>),
    DictionaryComprehension {
        key: Box<Expression>,
        value: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    Ellipsis,
    Float(f64),
    Generator {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    Integer(BigInt),
    Lambda {
        parameters: Vec<Parameter>,
        body: Box<Expression>,
    },
    List(Vec<Expression>),
    ListComprehension {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    /// A special constant the lowering keeps out of the access machinery
    /// (`None`, `NotImplemented`). Never aliased, never qualified.
    Name(Identifier),
    Set(Vec<Expression>),
    SetComprehension {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    Starred(Starred),
    String(StringLiteral),
    Ternary {
        target: Box<Expression>,
        test: Box<Expression>,
        alternative: Box<Expression>,
    },
    Tuple(Vec<Expression>),
    UnaryOperator {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Yield(Option<Box<Expression>>),
}

/// An assignment, covering annotated declarations without a value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Assign {
    pub target: Expression,
    pub annotation: Option<Expression>,
    pub value: Option<Expression>,
    /// Enclosing class qualifier, filled in during qualification.
    pub parent: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Class {
    pub name: Access,
    pub bases: Vec<CallArgument>,
    pub body: Vec<Statement>,
    pub decorators: Vec<Expression>,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Define {
    pub name: Access,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub decorators: Vec<Expression>,
    pub return_annotation: Option<Expression>,
    pub is_async: bool,
    /// Enclosing class qualifier, filled in during qualification.
    pub parent: Option<Reference>,
    pub docstring: Option<String>,
}

impl Define {
    /// The define's name as a reference; qualification guarantees the name
    /// is identifiers-only.
    #[must_use]
    pub fn name_reference(&self) -> Reference {
        self.name.as_reference().unwrap_or_default()
    }

    /// Whether the body is a stub: its last statement is a bare `...`.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        matches!(
            self.body.last().map(|statement| &statement.kind),
            Some(StatementKind::Expression(Expression {
                kind: ExpressionKind::Ellipsis,
                ..
            }))
        )
    }

    /// Whether the body yields anywhere, making the function a generator.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.body.iter().any(statement_yields)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct For {
    pub target: Expression,
    pub iterator: Expression,
    pub body: Vec<Statement>,
    pub orelse: Vec<Statement>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct If {
    pub test: Expression,
    pub body: Vec<Statement>,
    pub orelse: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportEntry {
    pub name: Reference,
    pub alias: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Import {
    /// The module of a `from M import …`; absent for plain `import M`.
    pub from: Option<Reference>,
    pub imports: Vec<ImportEntry>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Handler {
    pub kind: Option<Expression>,
    pub name: Option<Identifier>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Try {
    pub body: Vec<Statement>,
    pub handlers: Vec<Handler>,
    pub orelse: Vec<Statement>,
    pub finally: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct While {
    pub test: Expression,
    pub body: Vec<Statement>,
    pub orelse: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct With {
    pub items: Vec<(Expression, Option<Expression>)>,
    pub body: Vec<Statement>,
    pub is_async: bool,
}

/// A statement with its location and node id.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Statement {
    pub location: Location,
    pub id: NodeId,
    pub kind: StatementKind,
}

impl Statement {
    #[must_use]
    pub fn new(location: Location, id: NodeId, kind: StatementKind) -> Self {
        Self { location, id, kind }
    }

    /// A statement fabricated by a normalization pass.
    #[must_use]
    pub fn synthetic(location: Location, kind: StatementKind) -> Self {
        Self::new(location, NodeId::SYNTHETIC, kind)
    }

    /// Rebuilds the node around a new kind, keeping location and id.
    #[must_use]
    pub fn with_kind(&self, kind: StatementKind) -> Self {
        Self {
            location: self.location,
            id: self.id,
            kind,
        }
    }

    #[must_use]
    pub fn as_define(&self) -> Option<&Define> {
        match &self.kind {
            StatementKind::Define(define) => Some(define),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_class(&self) -> Option<&Class> {
        match &self.kind {
            StatementKind::Class(class) => Some(class),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StatementKind {
    Assign(Assign),
    Assert {
        test: Expression,
        message: Option<Expression>,
    },
    Break,
    Class(Class),
    Continue,
    Define(Define),
    Delete(Vec<Expression>),
    Expression(Expression),
    For(For),
    Global(Vec<Identifier>),
    If(If),
    Import(Import),
    Nonlocal(Vec<Identifier>),
    Pass,
    Raise(Option<Expression>),
    Return {
        expression: Option<Expression>,
        is_implicit: bool,
    },
    Try(Try),
    While(While),
    With(With),
    Yield(Expression),
    YieldFrom(Expression),
}

fn expression_yields(expression: &Expression) -> bool {
    match &expression.kind {
        ExpressionKind::Yield(_) => true,
        ExpressionKind::Await(inner) | ExpressionKind::UnaryOperator { operand: inner, .. } => expression_yields(inner),
        ExpressionKind::BooleanOperator { left, right, .. } => expression_yields(left) || expression_yields(right),
        ExpressionKind::Ternary {
            target,
            test,
            alternative,
        } => expression_yields(target) || expression_yields(test) || expression_yields(alternative),
        ExpressionKind::Tuple(items) | ExpressionKind::List(items) | ExpressionKind::Set(items) => {
            items.iter().any(expression_yields)
        }
        _ => false,
    }
}

/// Whether a statement (or any statement nested under it, nested defines
/// excluded) yields.
#[must_use]
pub fn statement_yields(statement: &Statement) -> bool {
    match &statement.kind {
        StatementKind::Yield(_) | StatementKind::YieldFrom(_) => true,
        StatementKind::Expression(expression) => expression_yields(expression),
        StatementKind::Assign(assign) => assign.value.as_ref().is_some_and(expression_yields),
        StatementKind::Return { expression, .. } => expression.as_ref().is_some_and(expression_yields),
        StatementKind::If(If { body, orelse, .. }) | StatementKind::While(While { body, orelse, .. }) => {
            body.iter().any(statement_yields) || orelse.iter().any(statement_yields)
        }
        StatementKind::For(For { body, orelse, .. }) => {
            body.iter().any(statement_yields) || orelse.iter().any(statement_yields)
        }
        StatementKind::With(With { body, .. }) => body.iter().any(statement_yields),
        StatementKind::Try(Try {
            body,
            handlers,
            orelse,
            finally,
        }) => {
            body.iter().any(statement_yields)
                || handlers.iter().any(|handler| handler.body.iter().any(statement_yields))
                || orelse.iter().any(statement_yields)
                || finally.iter().any(statement_yields)
        }
        _ => false,
    }
}

/// Per-source facts recorded at lowering time.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    pub path: String,
    pub number_of_lines: usize,
    pub is_stub: bool,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Source {
    pub handle: crate::location::Handle,
    pub qualifier: Reference,
    pub statements: Vec<Statement>,
    pub metadata: Metadata,
}

impl Source {
    /// Rebuilds the source around a new statement list.
    #[must_use]
    pub fn with_statements(&self, statements: Vec<Statement>) -> Self {
        Self {
            handle: self.handle,
            qualifier: self.qualifier.clone(),
            statements,
            metadata: self.metadata.clone(),
        }
    }

    /// Renders the source in the canonical textual form used by tests and
    /// diagnostics.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for statement in &self.statements {
            render_statement(&mut rendered, statement, 0);
        }
        rendered
    }
}

// ---------------------------------------------------------------------------
// Rendering.

fn render_arguments(f: &mut fmt::Formatter<'_>, arguments: &[CallArgument]) -> fmt::Result {
    f.write_str("(")?;
    for (index, argument) in arguments.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        if let Some(name) = &argument.name {
            write!(f, "{name} = ")?;
        }
        write!(f, "{}", argument.value)?;
    }
    f.write_str(")")
}

fn render_elements(f: &mut fmt::Formatter<'_>, elements: &[AccessElement]) -> fmt::Result {
    let mut first = true;
    for element in elements {
        match element {
            AccessElement::Identifier(name) => {
                if !first {
                    f.write_str(".")?;
                }
                f.write_str(name)?;
            }
            AccessElement::Call(call) => render_arguments(f, &call.arguments)?,
        }
        first = false;
    }
    Ok(())
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(elements) => render_elements(f, elements),
            Self::Expression(ExpressionAccess { expression, access }) => {
                write!(f, "({expression})")?;
                if matches!(access.first(), Some(AccessElement::Identifier(_))) {
                    f.write_str(".")?;
                }
                render_elements(f, access)
            }
        }
    }
}

fn render_comprehension_clauses(f: &mut fmt::Formatter<'_>, generators: &[Comprehension]) -> fmt::Result {
    for generator in generators {
        if generator.is_async {
            f.write_str(" async")?;
        }
        write!(f, " for {} in {}", generator.target, generator.iterator)?;
        for condition in &generator.conditions {
            write!(f, " if {condition}")?;
        }
    }
    Ok(())
}

fn render_parameters(f: &mut fmt::Formatter<'_>, parameters: &[Parameter]) -> fmt::Result {
    for (index, parameter) in parameters.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&parameter.name)?;
        if let Some(annotation) = &parameter.annotation {
            write!(f, ": {annotation}")?;
        }
        if let Some(value) = &parameter.value {
            write!(f, " = {value}")?;
        }
    }
    Ok(())
}

fn render_comma_separated(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access(access) => write!(f, "{access}"),
            Self::Await(inner) => write!(f, "await {inner}"),
            Self::Boolean(true) => f.write_str("True"),
            Self::Boolean(false) => f.write_str("False"),
            Self::BooleanOperator { left, operator, right } => write!(f, "{left} {operator} {right}"),
            Self::ComparisonOperator { left, comparisons } => {
                write!(f, "{left}")?;
                for (operator, right) in comparisons {
                    write!(f, " {operator} {right}")?;
                }
                Ok(())
            }
            Self::Complex(value) => write!(f, "{value}j"),
            Self::Dictionary(entries) => {
                f.write_str("{")?;
                for (index, entry) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    match entry {
                        DictionaryEntry::Pair { key, value } => write!(f, "{key}: {value}")?,
                        DictionaryEntry::Unpack(mapping) => write!(f, "**{mapping}")?,
                    }
                }
                f.write_str("}")
            }
            Self::DictionaryComprehension { key, value, generators } => {
                write!(f, "{{{key}: {value}")?;
                render_comprehension_clauses(f, generators)?;
                f.write_str("}")
            }
            Self::Ellipsis => f.write_str("..."),
            Self::Float(value) => write!(f, "{value}"),
            Self::Generator { element, generators } => {
                write!(f, "({element}")?;
                render_comprehension_clauses(f, generators)?;
                f.write_str(")")
            }
            Self::Integer(value) => write!(f, "{value}"),
            Self::Lambda { parameters, body } => {
                f.write_str("lambda")?;
                if !parameters.is_empty() {
                    f.write_str(" ")?;
                    render_parameters(f, parameters)?;
                }
                write!(f, ": {body}")
            }
            Self::List(items) => {
                f.write_str("[")?;
                render_comma_separated(f, items)?;
                f.write_str("]")
            }
            Self::ListComprehension { element, generators } => {
                write!(f, "[{element}")?;
                render_comprehension_clauses(f, generators)?;
                f.write_str("]")
            }
            Self::Name(name) => f.write_str(name),
            Self::Set(items) => {
                f.write_str("{")?;
                render_comma_separated(f, items)?;
                f.write_str("}")
            }
            Self::SetComprehension { element, generators } => {
                write!(f, "{{{element}")?;
                render_comprehension_clauses(f, generators)?;
                f.write_str("}")
            }
            Self::Starred(Starred::Once(inner)) => write!(f, "*{inner}"),
            Self::Starred(Starred::Twice(inner)) => write!(f, "**{inner}"),
            Self::String(literal) => match &literal.kind {
                StringKind::Raw => write!(f, "\"{}\"", literal.value),
                StringKind::Format(_) | StringKind::Mixed(_) => write!(f, "f\"{}\"", literal.value),
            },
            Self::Ternary {
                target,
                test,
                alternative,
            } => write!(f, "{target} if {test} else {alternative}"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                render_comma_separated(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::UnaryOperator { operator, operand } => write!(f, "{operator}{operand}"),
            Self::Yield(None) => f.write_str("yield"),
            Self::Yield(Some(inner)) => write!(f, "yield {inner}"),
        }
    }
}

fn indent(rendered: &mut String, level: usize) {
    for _ in 0..level {
        rendered.push_str("  ");
    }
}

fn render_block(rendered: &mut String, statements: &[Statement], level: usize) {
    for statement in statements {
        render_statement(rendered, statement, level);
    }
}

fn render_statement(rendered: &mut String, statement: &Statement, level: usize) {
    use std::fmt::Write;

    indent(rendered, level);
    match &statement.kind {
        StatementKind::Assign(Assign {
            target,
            annotation,
            value,
            ..
        }) => {
            let _ = write!(rendered, "{target}");
            if let Some(annotation) = annotation {
                let _ = write!(rendered, ": {annotation}");
            }
            if let Some(value) = value {
                let _ = write!(rendered, " = {value}");
            }
            rendered.push('\n');
        }
        StatementKind::Assert { test, message } => {
            let _ = write!(rendered, "assert {test}");
            if let Some(message) = message {
                let _ = write!(rendered, ", {message}");
            }
            rendered.push('\n');
        }
        StatementKind::Break => rendered.push_str("break\n"),
        StatementKind::Continue => rendered.push_str("continue\n"),
        StatementKind::Pass => rendered.push_str("pass\n"),
        StatementKind::Class(class) => {
            for decorator in &class.decorators {
                let _ = writeln!(rendered, "@{decorator}");
                indent(rendered, level);
            }
            let _ = write!(rendered, "class {}", class.name);
            if !class.bases.is_empty() {
                rendered.push('(');
                for (index, base) in class.bases.iter().enumerate() {
                    if index > 0 {
                        rendered.push_str(", ");
                    }
                    if let Some(name) = &base.name {
                        let _ = write!(rendered, "{name} = ");
                    }
                    let _ = write!(rendered, "{}", base.value);
                }
                rendered.push(')');
            }
            rendered.push_str(":\n");
            render_block(rendered, &class.body, level + 1);
        }
        StatementKind::Define(define) => {
            for decorator in &define.decorators {
                let _ = writeln!(rendered, "@{decorator}");
                indent(rendered, level);
            }
            if define.is_async {
                rendered.push_str("async ");
            }
            let _ = write!(rendered, "def {}(", define.name);
            {
                struct Params<'a>(&'a [Parameter]);
                impl fmt::Display for Params<'_> {
                    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        render_parameters(f, self.0)
                    }
                }
                let _ = write!(rendered, "{}", Params(&define.parameters));
            }
            rendered.push(')');
            if let Some(annotation) = &define.return_annotation {
                let _ = write!(rendered, " -> {annotation}");
            }
            rendered.push_str(":\n");
            render_block(rendered, &define.body, level + 1);
        }
        StatementKind::Delete(targets) => {
            rendered.push_str("del ");
            for (index, target) in targets.iter().enumerate() {
                if index > 0 {
                    rendered.push_str(", ");
                }
                let _ = write!(rendered, "{target}");
            }
            rendered.push('\n');
        }
        StatementKind::Expression(expression) => {
            let _ = writeln!(rendered, "{expression}");
        }
        StatementKind::For(For {
            target,
            iterator,
            body,
            orelse,
            is_async,
        }) => {
            if *is_async {
                rendered.push_str("async ");
            }
            let _ = writeln!(rendered, "for {target} in {iterator}:");
            render_block(rendered, body, level + 1);
            if !orelse.is_empty() {
                indent(rendered, level);
                rendered.push_str("else:\n");
                render_block(rendered, orelse, level + 1);
            }
        }
        StatementKind::Global(names) => {
            let _ = writeln!(rendered, "global {}", names.join(", "));
        }
        StatementKind::Nonlocal(names) => {
            let _ = writeln!(rendered, "nonlocal {}", names.join(", "));
        }
        StatementKind::If(If { test, body, orelse }) => {
            let _ = writeln!(rendered, "if {test}:");
            render_block(rendered, body, level + 1);
            if !orelse.is_empty() {
                indent(rendered, level);
                rendered.push_str("else:\n");
                render_block(rendered, orelse, level + 1);
            }
        }
        StatementKind::Import(Import { from, imports }) => {
            if let Some(from) = from {
                let _ = write!(rendered, "from {from} import ");
            } else {
                rendered.push_str("import ");
            }
            for (index, entry) in imports.iter().enumerate() {
                if index > 0 {
                    rendered.push_str(", ");
                }
                let _ = write!(rendered, "{}", entry.name);
                if let Some(alias) = &entry.alias {
                    let _ = write!(rendered, " as {alias}");
                }
            }
            rendered.push('\n');
        }
        StatementKind::Raise(expression) => {
            rendered.push_str("raise");
            if let Some(expression) = expression {
                let _ = write!(rendered, " {expression}");
            }
            rendered.push('\n');
        }
        StatementKind::Return { expression, .. } => {
            rendered.push_str("return");
            if let Some(expression) = expression {
                let _ = write!(rendered, " {expression}");
            }
            rendered.push('\n');
        }
        StatementKind::Try(Try {
            body,
            handlers,
            orelse,
            finally,
        }) => {
            rendered.push_str("try:\n");
            render_block(rendered, body, level + 1);
            for handler in handlers {
                indent(rendered, level);
                rendered.push_str("except");
                if let Some(kind) = &handler.kind {
                    let _ = write!(rendered, " {kind}");
                }
                if let Some(name) = &handler.name {
                    let _ = write!(rendered, " as {name}");
                }
                rendered.push_str(":\n");
                render_block(rendered, &handler.body, level + 1);
            }
            if !orelse.is_empty() {
                indent(rendered, level);
                rendered.push_str("else:\n");
                render_block(rendered, orelse, level + 1);
            }
            if !finally.is_empty() {
                indent(rendered, level);
                rendered.push_str("finally:\n");
                render_block(rendered, finally, level + 1);
            }
        }
        StatementKind::While(While { test, body, orelse }) => {
            let _ = writeln!(rendered, "while {test}:");
            render_block(rendered, body, level + 1);
            if !orelse.is_empty() {
                indent(rendered, level);
                rendered.push_str("else:\n");
                render_block(rendered, orelse, level + 1);
            }
        }
        StatementKind::With(With { items, body, is_async }) => {
            if *is_async {
                rendered.push_str("async ");
            }
            rendered.push_str("with ");
            for (index, (item, target)) in items.iter().enumerate() {
                if index > 0 {
                    rendered.push_str(", ");
                }
                let _ = write!(rendered, "{item}");
                if let Some(target) = target {
                    let _ = write!(rendered, " as {target}");
                }
            }
            rendered.push_str(":\n");
            render_block(rendered, body, level + 1);
        }
        StatementKind::Yield(expression) => {
            let _ = writeln!(rendered, "{expression}");
        }
        StatementKind::YieldFrom(expression) => {
            let _ = writeln!(rendered, "yield from {expression}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Handle, Position};

    fn location() -> Location {
        Location::point(Handle::from_index(0), Position::new(1, 0))
    }

    #[test]
    fn sanitize_strips_synthetic_wrappers() {
        assert_eq!(sanitize_identifier("$local_module?foo$x"), "x");
        assert_eq!(sanitize_identifier("$parameter$self"), "self");
        assert_eq!(sanitize_identifier("$target$error"), "error");
        assert_eq!(sanitize_identifier("_private"), "_private");
        assert_eq!(sanitize_identifier("__dunder__"), "__dunder__");
    }

    #[test]
    fn binary_operator_dunder_names() {
        assert_eq!(BinaryOperator::Add.dunder(), "__add__");
        assert_eq!(BinaryOperator::FloorDivide.dunder(), "__floordiv__");
        assert_eq!(BinaryOperator::Add.inplace_dunder(), "__iadd__");
    }

    #[test]
    fn access_renders_call_chains() {
        let access = Access::Simple(vec![
            AccessElement::identifier("a"),
            AccessElement::identifier("foo"),
            AccessElement::Call(CallElement {
                location: location(),
                arguments: vec![CallArgument::positional(Expression::new(
                    location(),
                    ExpressionKind::Integer(BigInt::from(1)),
                ))],
            }),
            AccessElement::identifier("bar"),
            AccessElement::Call(CallElement {
                location: location(),
                arguments: Vec::new(),
            }),
        ]);
        assert_eq!(access.to_string(), "a.foo(1).bar()");
        assert!(access.is_call());
    }

    #[test]
    fn reference_round_trips_through_access() {
        let reference = Reference::from_dotted("a.b.c");
        let access: Access = reference.clone().into();
        assert_eq!(access.as_reference(), Some(reference));
    }
}
