#![doc = include_str!("../../../README.md")]

mod ast;
mod callgraph;
mod environment;
mod error;
mod location;
mod parse;
mod preprocess;
mod qualify;
mod scope;
mod tracer;
mod visit;

pub use crate::{
    ast::{
        Access, AccessElement, Assign, BinaryOperator, BooleanOperator, CallArgument, CallElement, Class,
        ComparisonOperator, Comprehension, Define, DictionaryEntry, Expression, ExpressionAccess, ExpressionKind, For,
        Handler, Identifier, If, Import, ImportEntry, Metadata, NodeId, Parameter, Reference, Source, Starred,
        Statement, StatementKind, StringKind, StringLiteral, Substring, SubstringKind, Try, UnaryOperator, While,
        With, sanitize_identifier, statement_yields,
    },
    callgraph::{CallGraph, overrides_of_source, partition, statement_keys},
    environment::{Callable, CallableKind, Element, Environment, ModuleExports, Resolution, Signature},
    error::{AnalysisError, ErrorKind},
    location::{Handle, HandleTable, InstantiatedLocation, Location, Position},
    parse::{Parse, ParseError, RuffParser, parse_fragment},
    preprocess::{
        PreprocessError, classes, defines, dequalify_map, expand_format_string, expand_implicit_returns,
        expand_relative_imports, expand_string_annotations, expand_type_checking_imports,
        expand_typed_dictionary_declarations, expand_wildcard_imports, preprocess, preprocess_traced,
        replace_mypy_extensions_stub, replace_platform_specific_code, replace_version_specific_code, try_preprocess,
        try_preprocess_traced,
    },
    qualify::{local_identifier, qualify},
    scope::{Alias, Scope},
    tracer::{NoopTracer, PipelineTracer, RecordingTracer, TraceEvent},
    visit::{Collector, StatementTransform, Transform, collect_statements, transform_expression_tree,
        transform_source, transform_statements},
};
