use krait::{HandleTable, NoopTracer, RuffParser, Source, qualify};
use pretty_assertions::assert_eq;

fn parse(code: &str, qualifier: &str) -> (Source, RuffParser) {
    let parser = RuffParser::new();
    let mut handles = HandleTable::new();
    let source = parser
        .parse_source(code, "test.py", qualifier, &mut handles)
        .expect("parse");
    (source, parser)
}

fn qualified(code: &str) -> String {
    let (source, parser) = parse(code, "test");
    let mut tracer = NoopTracer;
    qualify(source, &parser, &mut tracer).render()
}

#[test]
fn module_locals_are_renamed() {
    assert_eq!(
        qualified("a = 1\nb = a\n"),
        "$local_test$a = 1\n$local_test$b = $local_test$a\n"
    );
}

#[test]
fn rebinding_reuses_the_local_name() {
    assert_eq!(
        qualified("a = 1\na = 2\n"),
        "$local_test$a = 1\n$local_test$a = 2\n"
    );
}

#[test]
fn assignment_values_read_the_scope_before_the_binding() {
    // The right-hand `x` refers to whatever `x` meant before this statement.
    assert_eq!(qualified("x = x\n"), "$local_test$x = x\n");
}

#[test]
fn class_bodies_promote_attributes_and_methods() {
    let code = "class Foo:\n    attribute = 1\n\n    def bar(self):\n        return self.attribute\n";
    let expected = "class test.Foo:\n  test.Foo.attribute = 1\n  def test.Foo.bar($parameter$self):\n    return $parameter$self.attribute\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn promoted_class_attributes_drop_leading_underscores() {
    let code = "class Foo:\n    _x = 1\n    y = _x\n";
    let expected = "class test.Foo:\n  test.Foo.x = 1\n  test.Foo.y = test.Foo.x\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn subscript_stores_qualify_their_receiver() {
    let code = "d = {}\nd[k] = 1\n";
    let expected = "$local_test$d = {}\n$local_test$d.__setitem__(k, 1)\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn parameters_keep_defaults_and_annotations() {
    let code = "def foo(x: int = 5) -> str:\n    return x\n";
    let expected = "def test.foo($parameter$x: int = 5) -> str:\n  return $parameter$x\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn star_parameters_keep_their_prefix() {
    let code = "def foo(*args, **kwargs):\n    return args\n";
    let expected = "def test.foo(*$parameter$args, **$parameter$kwargs):\n  return $parameter$args\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn from_imports_install_aliases_without_rewriting_the_import() {
    let code = "from a.b import c\nd = c\n";
    let expected = "from a.b import c\n$local_test$d = a.b.c\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn aliased_module_imports_resolve_through_the_alias() {
    let code = "import a.b as ab\nx = ab.attr\n";
    let expected = "import a.b as ab\n$local_test$x = a.b.attr\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn unaliased_module_imports_install_nothing() {
    let code = "import a.b\nx = a.b.attr\n";
    let expected = "import a.b\n$local_test$x = a.b.attr\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn builtins_imports_are_left_alone() {
    let code = "from builtins import len\nx = len\n";
    let expected = "from builtins import len\n$local_test$x = len\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn top_level_forward_references_resolve() {
    let code = "x = C()\nclass C:\n    pass\n";
    let expected = "$local_test$x = test.C()\nclass test.C:\n  pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn function_bodies_do_not_honor_forward_references() {
    let code = "def f():\n    return C()\nclass C:\n    pass\n";
    let expected = "def test.f():\n  return C()\nclass test.C:\n  pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn global_names_are_not_rebound_as_locals() {
    let code = "x = 0\ndef f():\n    global x\n    x = 1\n";
    let expected = "$local_test$x = 0\ndef test.f():\n  global x\n  $local_test$x = 1\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn exception_bindings_use_the_target_prefix() {
    let code = "try:\n    pass\nexcept Exception as e:\n    raise e\n";
    let expected = "try:\n  pass\nexcept Exception as $target$e:\n  raise $target$e\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn branch_joins_prefer_the_first_branch() {
    let code = "if c:\n    from a import f\nelse:\n    from b import f\nf()\n";
    let expected = "if c:\n  from a import f\nelse:\n  from b import f\na.f()\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn regular_decorators_qualify() {
    let code = "from m import d\n@d\ndef g():\n    pass\n";
    let expected = "from m import d\n@m.d\ndef test.g():\n  pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn accessor_decorators_are_skipped() {
    let code = "class Foo:\n    @property\n    def f(self):\n        return 1\n\n    @f.setter\n    def f(self, value):\n        pass\n";
    let expected = "class test.Foo:\n  @property\n  def test.Foo.f($parameter$self):\n    return 1\n  @f.setter\n  def test.Foo.f($parameter$self, $parameter$value):\n    pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn with_targets_bind_as_locals() {
    let code = "with open() as f:\n    f.read()\n";
    let expected = "with open() as $local_test$f:\n  $local_test$f.read()\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn for_targets_bind_tuple_patterns() {
    let code = "for x, y in pairs:\n    print(x)\n";
    let expected = "for ($local_test$x, $local_test$y) in pairs:\n  print($local_test$x)\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn call_argument_names_get_the_parameter_prefix() {
    assert_eq!(qualified("f(x=1)\n"), "f($parameter$x = 1)\n");
}

#[test]
fn typevar_string_arguments_qualify_as_annotations() {
    let code = "import typing\nT = typing.TypeVar('T', bound='C')\nclass C:\n    pass\n";
    let expected =
        "import typing\n$local_test$T = typing.TypeVar(\"T\", $parameter$bound = \"test.C\")\nclass test.C:\n  pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn string_annotations_qualify_through_reparsing() {
    let code = "x: 'C' = 1\nclass C:\n    pass\n";
    let expected = "$local_test$x: \"test.C\" = 1\nclass test.C:\n  pass\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn method_locals_carry_the_full_scope_qualifier() {
    let code = "class X:\n    def caller(self):\n        a = A()\n        a.foo()\n";
    let expected = "class test.X:\n  def test.X.caller($parameter$self):\n    $local_test?X?caller$a = A()\n    $local_test?X?caller$a.foo()\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn comprehension_targets_stay_local_to_the_comprehension() {
    let code = "xs = [y for y in items]\nz = y\n";
    // The comprehension binding does not leak into the enclosing scope.
    let expected = "$local_test$xs = [$local_test$y for $local_test$y in items]\n$local_test$z = y\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn lambda_parameters_are_renamed() {
    let code = "f = lambda x: x\n";
    let expected = "$local_test$f = lambda $parameter$x: $parameter$x\n";
    assert_eq!(qualified(code), expected);
}

#[test]
fn qualification_is_idempotent() {
    let code = "from a import f\nclass Foo:\n    def bar(self):\n        x = f()\n        return x\n";
    let (source, parser) = parse(code, "test");
    let mut tracer = NoopTracer;
    let once = qualify(source, &parser, &mut tracer);
    let twice = qualify(once.clone(), &parser, &mut tracer);
    assert_eq!(twice.render(), once.render());
}
