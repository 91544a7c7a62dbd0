use krait::{
    Expression, ExpressionKind, HandleTable, ModuleExports, PreprocessError, RecordingTracer, Reference, RuffParser,
    Source, StatementKind, StringKind, TraceEvent, defines, dequalify_map, expand_format_string,
    expand_implicit_returns, expand_relative_imports, expand_string_annotations, expand_type_checking_imports,
    expand_wildcard_imports, preprocess, replace_mypy_extensions_stub, replace_platform_specific_code,
    replace_version_specific_code, try_preprocess,
};
use pretty_assertions::assert_eq;

fn parse(code: &str, qualifier: &str) -> (Source, RuffParser) {
    parse_at(code, "test.py", qualifier)
}

fn parse_at(code: &str, path: &str, qualifier: &str) -> (Source, RuffParser) {
    let parser = RuffParser::new();
    let mut handles = HandleTable::new();
    let source = parser
        .parse_source(code, path, qualifier, &mut handles)
        .expect("parse");
    (source, parser)
}

fn no_exports() -> ModuleExports {
    let mut exports = ModuleExports::new();
    exports.freeze();
    exports
}

// -- pass 1: relative imports ----------------------------------------------

#[test]
fn relative_imports_resolve_against_the_qualifier() {
    let (source, _) = parse("from . import x\nfrom ..other import y\nfrom .sibling import z\n", "pkg.mod");
    let expanded = expand_relative_imports(source);
    assert_eq!(
        expanded.render(),
        "from pkg import x\nfrom other import y\nfrom pkg.sibling import z\n"
    );
}

#[test]
fn absolute_imports_are_untouched() {
    let (source, _) = parse("from a.b import c\n", "pkg.mod");
    assert_eq!(expand_relative_imports(source).render(), "from a.b import c\n");
}

// -- pass 2: string annotations --------------------------------------------

#[test]
fn string_annotations_parse_into_expressions() {
    let (source, parser) = parse("x: \"List[int]\" = 1\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_string_annotations(source, &parser, &mut tracer);
    assert_eq!(expanded.render(), "x: List.__getitem__(int) = 1\n");
    assert!(tracer.events.is_empty());
}

#[test]
fn define_annotations_parse_into_expressions() {
    let (source, parser) = parse("def f(x: \"int\") -> \"str\":\n    pass\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_string_annotations(source, &parser, &mut tracer);
    assert_eq!(expanded.render(), "def f(x: int) -> str:\n  pass\n");
}

#[test]
fn cast_type_arguments_parse_into_expressions() {
    let (source, parser) = parse("y = typing.cast(\"Foo\", x)\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_string_annotations(source, &parser, &mut tracer);
    assert_eq!(expanded.render(), "y = typing.cast(Foo, x)\n");
}

#[test]
fn literal_arguments_stay_strings() {
    let (source, parser) = parse("x: Literal[\"a\"] = 1\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_string_annotations(source, &parser, &mut tracer);
    assert_eq!(expanded.render(), "x: Literal.__getitem__(\"a\") = 1\n");
}

#[test]
fn unparsable_annotations_degrade_to_the_sentinel() {
    let (source, parser) = parse("x: \"1 +\" = 1\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_string_annotations(source, &parser, &mut tracer);
    assert_eq!(expanded.render(), "x: $unparsed_annotation = 1\n");
    assert!(matches!(
        tracer.events.as_slice(),
        [TraceEvent::UnparsedAnnotation { text, .. }] if text == "1 +"
    ));
}

// -- pass 3: format strings ------------------------------------------------

fn format_expressions(source: &Source) -> (String, Vec<String>, Vec<Expression>) {
    let StatementKind::Assign(assign) = &source.statements[0].kind else {
        panic!("expected assignment");
    };
    let Some(Expression {
        kind: ExpressionKind::String(literal),
        ..
    }) = &assign.value
    else {
        panic!("expected string value");
    };
    let StringKind::Format(expressions) = &literal.kind else {
        panic!("expected format string, got {:?}", literal.kind);
    };
    (
        literal.value.clone(),
        expressions.iter().map(ToString::to_string).collect(),
        expressions.clone(),
    )
}

#[test]
fn format_strings_extract_their_substitutions() {
    let (source, parser) = parse("x = f\"{y} and {z}\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (value, rendered, expressions) = format_expressions(&expanded);
    assert_eq!(value, "{y} and {z}");
    assert_eq!(rendered, ["y", "z"]);
    // `x = f"{y} and {z}"`: the first substitution starts at column 7.
    assert_eq!(expressions[0].location.start.line, 1);
    assert_eq!(expressions[0].location.start.column, 7);
    assert!(tracer.events.is_empty());
}

#[test]
fn doubled_braces_are_escapes() {
    let (source, parser) = parse("x = f\"{{escaped}}\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (_, rendered, _) = format_expressions(&expanded);
    assert!(rendered.is_empty());
    assert!(tracer.events.is_empty());
}

#[test]
fn leading_blanks_in_substitutions_are_stripped() {
    let (source, parser) = parse("x = f\"{  y}\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (_, rendered, expressions) = format_expressions(&expanded);
    assert_eq!(rendered, ["y"]);
    // Stripping moves the fragment origin onto the identifier itself.
    assert_eq!(expressions[0].location.start.column, 9);
}

#[test]
fn nested_braces_are_not_tracked() {
    // The scanner deliberately does not handle `{` nesting: the inner brace
    // collapses the empty substitution back to literal state and nothing is
    // extracted.
    let (source, parser) = parse("x = f\"{ {1:2} }\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (_, rendered, _) = format_expressions(&expanded);
    assert!(rendered.is_empty());
}

#[test]
fn unparsable_substitutions_are_dropped_and_traced() {
    let (source, parser) = parse("x = f\"{1 +}\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (_, rendered, _) = format_expressions(&expanded);
    assert!(rendered.is_empty());
    assert!(matches!(
        tracer.events.as_slice(),
        [TraceEvent::DroppedFormatFragment { text, .. }] if text == "1 +"
    ));
}

#[test]
fn concatenated_strings_scan_only_format_parts() {
    let (source, parser) = parse("x = \"lit\" f\"{y}\"\n", "test");
    let mut tracer = RecordingTracer::new();
    let expanded = expand_format_string(source, &parser, &mut tracer);
    let (value, rendered, _) = format_expressions(&expanded);
    assert_eq!(value, "lit{y}");
    assert_eq!(rendered, ["y"]);
}

// -- pass 4: platform conditionals -----------------------------------------

#[test]
fn win32_equality_takes_the_else_branch() {
    let (source, _) = parse("if sys.platform == \"win32\":\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_platform_specific_code(source).render(), "b = 2\n");
}

#[test]
fn win32_inequality_takes_the_body() {
    let (source, _) = parse("if sys.platform != \"win32\":\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_platform_specific_code(source).render(), "a = 1\n");
}

#[test]
fn matching_platform_takes_the_body() {
    let (source, _) = parse("if sys.platform == \"linux\":\n    a = 1\n", "test");
    assert_eq!(replace_platform_specific_code(source).render(), "a = 1\n");
}

#[test]
fn empty_platform_branches_become_pass() {
    let (source, _) = parse("if sys.platform == \"win32\":\n    a = 1\n", "test");
    assert_eq!(replace_platform_specific_code(source).render(), "pass\n");
}

#[test]
fn platform_is_comparisons_fold_too() {
    let (source, _) = parse("if sys.platform is \"win32\":\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_platform_specific_code(source).render(), "b = 2\n");
}

#[test]
fn unrelated_conditionals_are_untouched() {
    let (source, _) = parse("if foo == \"win32\":\n    a = 1\n", "test");
    assert_eq!(
        replace_platform_specific_code(source).render(),
        "if foo == \"win32\":\n  a = 1\n"
    );
}

// -- pass 5: version conditionals ------------------------------------------

#[test]
fn version_below_three_takes_the_else_branch() {
    let (source, _) = parse("if sys.version_info < (3, 0):\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "b = 2\n");
}

#[test]
fn major_component_below_three_takes_the_else_branch() {
    let (source, _) = parse("if sys.version_info[0] < 3:\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "b = 2\n");
}

#[test]
fn three_below_version_takes_the_body() {
    let (source, _) = parse("if (3,) < sys.version_info:\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "a = 1\n");
}

#[test]
fn three_below_major_component_takes_the_body() {
    let (source, _) = parse("if 3 < sys.version_info[0]:\n    a = 1\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "a = 1\n");
}

#[test]
fn at_least_three_takes_the_body() {
    let (source, _) = parse("if sys.version_info >= (3, 5):\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "a = 1\n");
}

#[test]
fn version_equality_never_pins() {
    let (source, _) = parse("if sys.version_info == (3, 6):\n    a = 1\nelse:\n    b = 2\n", "test");
    assert_eq!(replace_version_specific_code(source).render(), "b = 2\n");
}

#[test]
fn non_three_comparisons_are_untouched() {
    let (source, _) = parse("if sys.version_info < (2, 7):\n    a = 1\n", "test");
    assert_eq!(
        replace_version_specific_code(source).render(),
        "if sys.version_info < (2, 7):\n  a = 1\n"
    );
}

// -- pass 6: TYPE_CHECKING -------------------------------------------------

#[test]
fn type_checking_blocks_splice_their_body() {
    let (source, _) = parse(
        "from typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    from a import b\n",
        "test",
    );
    assert_eq!(
        expand_type_checking_imports(source).render(),
        "from typing import TYPE_CHECKING\nfrom a import b\n"
    );
}

#[test]
fn qualified_type_checking_blocks_splice_too() {
    let (source, _) = parse("import typing\nif typing.TYPE_CHECKING:\n    x = 1\n", "test");
    assert_eq!(
        expand_type_checking_imports(source).render(),
        "import typing\nx = 1\n"
    );
}

// -- pass 7: wildcard imports ----------------------------------------------

#[test]
fn known_wildcards_expand_to_explicit_imports() {
    let mut exports = ModuleExports::new();
    exports.insert(Reference::from_dotted("a.b"), vec!["x".to_owned(), "y".to_owned()]);
    exports.freeze();
    let (source, _) = parse("from a.b import *\n", "test");
    let expanded = expand_wildcard_imports(source, &exports, false).expect("exports are known");
    assert_eq!(expanded.render(), "from a.b import x, y\n");
}

#[test]
fn unknown_wildcards_defer_when_not_forced() {
    let (source, _) = parse("from unknown import *\n", "test");
    let error = expand_wildcard_imports(source, &no_exports(), false).expect_err("unknown module");
    assert_eq!(
        error,
        PreprocessError::MissingWildcardImport {
            qualifier: Reference::from_dotted("unknown")
        }
    );
}

#[test]
fn unknown_wildcards_survive_when_forced() {
    let (source, _) = parse("from unknown import *\n", "test");
    let expanded = expand_wildcard_imports(source, &no_exports(), true).expect("forced");
    assert_eq!(expanded.render(), "from unknown import *\n");
}

#[test]
fn try_preprocess_defers_on_unknown_wildcards() {
    let (source, parser) = parse("from unknown import *\n", "test");
    assert!(try_preprocess(source, &parser, &no_exports()).is_none());
}

#[test]
fn preprocess_forces_unknown_wildcards() {
    let (source, parser) = parse("from unknown import *\n", "test");
    let processed = preprocess(source, &parser, &no_exports());
    assert_eq!(processed.render(), "from unknown import *\n");
}

// -- pass 9: implicit returns ----------------------------------------------

#[test]
fn falling_bodies_get_a_synthetic_return() {
    let (source, _) = parse("def f():\n    x = 1\n", "test");
    let expanded = expand_implicit_returns(source);
    assert_eq!(expanded.render(), "def f():\n  x = 1\n  return\n");
    let define = expanded.statements[0].as_define().expect("define");
    assert!(matches!(
        define.body.last().map(|statement| &statement.kind),
        Some(StatementKind::Return { is_implicit: true, .. })
    ));
}

#[test]
fn explicit_returns_are_not_duplicated() {
    let (source, _) = parse("def f():\n    return 1\n", "test");
    assert_eq!(expand_implicit_returns(source).render(), "def f():\n  return 1\n");
}

#[test]
fn generators_get_no_synthetic_return() {
    let (source, _) = parse("def f():\n    yield 1\n", "test");
    assert_eq!(expand_implicit_returns(source).render(), "def f():\n  yield 1\n");
}

#[test]
fn infinite_loops_get_no_synthetic_return() {
    let (source, _) = parse("def f():\n    while True:\n        pass\n", "test");
    assert_eq!(
        expand_implicit_returns(source).render(),
        "def f():\n  while True:\n    pass\n"
    );
}

#[test]
fn returning_finally_blocks_get_no_synthetic_return() {
    let (source, _) = parse("def f():\n    try:\n        pass\n    finally:\n        return 1\n", "test");
    assert_eq!(
        expand_implicit_returns(source).render(),
        "def f():\n  try:\n    pass\n  finally:\n    return 1\n"
    );
}

#[test]
fn conditional_returns_still_get_the_synthetic_return() {
    let (source, _) = parse("def f(x):\n    if x:\n        return 1\n", "test");
    assert_eq!(
        expand_implicit_returns(source).render(),
        "def f(x):\n  if x:\n    return 1\n  return\n"
    );
}

// -- passes 10-11: TypedDict -----------------------------------------------

#[test]
fn the_mypy_extensions_stub_rewrites_typed_dict() {
    let (source, _) = parse_at(
        "def TypedDict(typename, fields=None, total=True): ...\n",
        "mypy_extensions.pyi",
        "mypy_extensions",
    );
    assert_eq!(
        replace_mypy_extensions_stub(source).render(),
        "TypedDict: typing._SpecialForm = ...\n"
    );
}

#[test]
fn other_stubs_are_untouched_by_the_mypy_pass() {
    let (source, _) = parse_at("def TypedDict(): ...\n", "other.pyi", "other");
    assert_eq!(replace_mypy_extensions_stub(source).render(), "def TypedDict():\n  ...\n");
}

#[test]
fn typed_dict_assignment_declarations_canonicalize() {
    let code = "import mypy_extensions\nMovie = mypy_extensions.TypedDict('Movie', {'name': str, 'year': int})\n";
    let (source, parser) = parse(code, "test");
    let processed = preprocess(source, &parser, &no_exports());
    let subscript =
        "mypy_extensions.TypedDict.__getitem__((\"Movie\", True, (\"name\", str), (\"year\", int)))";
    let expected = format!(
        "import mypy_extensions\n$local_test$Movie: typing.Type.__getitem__({subscript}) = {subscript}\n"
    );
    assert_eq!(processed.render(), expected);
}

#[test]
fn typed_dict_class_declarations_canonicalize() {
    let code = "import mypy_extensions\nclass Movie(mypy_extensions.TypedDict, total=False):\n    name: str\n    year: int\n";
    let (source, parser) = parse(code, "test");
    let processed = preprocess(source, &parser, &no_exports());
    let subscript =
        "mypy_extensions.TypedDict.__getitem__((\"Movie\", False, (\"name\", str), (\"year\", int)))";
    let expected = format!(
        "import mypy_extensions\ntest.Movie: typing.Type.__getitem__({subscript}) = {subscript}\n"
    );
    assert_eq!(processed.render(), expected);
}

// -- the full pipeline ------------------------------------------------------

#[test]
fn preprocessing_is_idempotent() {
    let code = "from typing import TYPE_CHECKING\nimport sys\n\nclass Foo:\n    def bar(self):\n        return self.baz()\n\n    def baz(self):\n        return 1\n\ndef top():\n    x = Foo()\n    return x.bar()\n";
    let (source, parser) = parse(code, "test");
    let once = preprocess(source, &parser, &no_exports());
    let twice = preprocess(once.clone(), &parser, &no_exports());
    assert_eq!(twice.render(), once.render());
}

#[test]
fn every_define_terminates_after_preprocessing() {
    let code = "def a():\n    pass\n\ndef b():\n    yield 1\n\nclass C:\n    def method(self):\n        x = 1\n";
    let (source, parser) = parse(code, "test");
    let processed = preprocess(source, &parser, &no_exports());
    for statement in defines(&processed, true, true, false) {
        let define = statement.as_define().expect("define");
        let terminates = matches!(
            define.body.last().map(|last| &last.kind),
            Some(StatementKind::Return { .. })
        ) || define.is_generator();
        assert!(terminates, "define {} does not terminate", define.name);
    }
}

// -- queries -----------------------------------------------------------------

#[test]
fn defines_respect_nesting_and_stub_flags() {
    let code = "def foo():\n    def bar():\n        pass\n\ndef stub():\n    ...\n\nclass C:\n    def method(self):\n        pass\n";
    let (source, _) = parse(code, "test");

    let names = |result: Vec<krait::Statement>| {
        result
            .into_iter()
            .map(|statement| statement.as_define().expect("define").name.to_string())
            .collect::<Vec<_>>()
    };

    assert_eq!(names(defines(&source, false, false, false)), ["foo", "method"]);
    assert_eq!(names(defines(&source, false, true, false)), ["foo", "bar", "method"]);
    assert_eq!(names(defines(&source, true, false, false)), ["foo", "stub", "method"]);

    let with_toplevel = defines(&source, false, false, true);
    let toplevel = with_toplevel[0].as_define().expect("define");
    assert_eq!(toplevel.name.to_string(), "test.$toplevel");
    assert_eq!(toplevel.body.len(), source.statements.len());
}

#[test]
fn dequalify_map_is_keyed_by_reversed_accesses() {
    let code = "from a.b import c as d\nimport x.y as z\nfrom m import n\n";
    let (source, _) = parse(code, "test");
    let map = dequalify_map(&source);
    assert_eq!(
        map.get(&Reference::new(vec!["c".into(), "b".into(), "a".into()])),
        Some(&Reference::from_dotted("d"))
    );
    assert_eq!(
        map.get(&Reference::new(vec!["y".into(), "x".into()])),
        Some(&Reference::from_dotted("z"))
    );
    assert_eq!(
        map.get(&Reference::new(vec!["n".into(), "m".into()])),
        Some(&Reference::from_dotted("n"))
    );
}
