use krait::{
    CallGraph, Element, Environment, HandleTable, ModuleExports, NodeId, Reference, RuffParser, Source, defines,
    overrides_of_source, preprocess, statement_keys,
};
use pretty_assertions::assert_eq;

fn processed(code: &str, qualifier: &str) -> Source {
    let parser = RuffParser::new();
    let mut handles = HandleTable::new();
    let source = parser
        .parse_source(code, "test.py", qualifier, &mut handles)
        .expect("parse");
    let mut exports = ModuleExports::new();
    exports.freeze();
    preprocess(source, &parser, &exports)
}

fn define_id(source: &Source, qualified_name: &str) -> NodeId {
    defines(source, true, true, false)
        .into_iter()
        .find(|statement| {
            statement
                .as_define()
                .is_some_and(|define| define.name.to_string() == qualified_name)
        })
        .unwrap_or_else(|| panic!("no define named {qualified_name}"))
        .id
}

fn reference(name: &str) -> Reference {
    Reference::from_dotted(name)
}

fn sorted(mut component: Vec<Reference>) -> Vec<Reference> {
    component.sort();
    component
}

#[test]
fn construction_edge() {
    let code = "class Foo:\n    def __init__(self):\n        pass\n\n    def bar(self):\n        return 10\n\n    def quux(self):\n        return self.bar()\n";
    let source = processed(code, "");
    let mut environment = Environment::new();
    environment.add_resolution(
        define_id(&source, "Foo.quux"),
        0,
        "$parameter$self.bar()",
        Element::named("Foo.bar"),
    );
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(graph.callees(&reference("Foo.quux")), vec![reference("Foo.bar")]);
    assert_eq!(graph.edges().len(), 1);
}

#[test]
fn mutual_recursion_forms_one_component() {
    let code = "class Foo:\n    def bar(self):\n        return self.quux()\n\n    def quux(self):\n        return self.bar()\n";
    let source = processed(code, "");
    let mut environment = Environment::new();
    environment.add_resolution(
        define_id(&source, "Foo.bar"),
        0,
        "$parameter$self.quux()",
        Element::named("Foo.quux"),
    );
    environment.add_resolution(
        define_id(&source, "Foo.quux"),
        0,
        "$parameter$self.bar()",
        Element::named("Foo.bar"),
    );
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(graph.callees(&reference("Foo.bar")), vec![reference("Foo.quux")]);
    assert_eq!(graph.callees(&reference("Foo.quux")), vec![reference("Foo.bar")]);

    let partition = graph.partition();
    assert_eq!(partition.len(), 1);
    assert_eq!(
        sorted(partition[0].clone()),
        vec![reference("Foo.bar"), reference("Foo.quux")]
    );
}

#[test]
fn constructor_dependency() {
    let code = "class A:\n    def __init__(self) -> 'A':\n        return self\n\nclass B:\n    def __init__(self) -> 'A':\n        return A()\n";
    let source = processed(code, "");
    let mut environment = Environment::new();
    environment.add_resolution(define_id(&source, "B.__init__"), 0, "A()", Element::named("A.__init__"));
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(graph.callees(&reference("B.__init__")), vec![reference("A.__init__")]);
}

#[test]
fn assignment_retypes_the_receiver() {
    let code = "class A:\n    def foo(self) -> int:\n        return 1\n\nclass B:\n    def foo(self) -> int:\n        return 2\n\nclass X:\n    def caller(self):\n        a = A()\n        a.foo()\n        a = B()\n        a.foo()\n";
    let source = processed(code, "test1");
    let caller = define_id(&source, "test1.X.caller");

    // The checker publishes per-statement resolutions: after the second
    // assignment the same receiver access resolves to the other class.
    let mut environment = Environment::new();
    environment.add_resolution(caller, 1, "$local_test1?X?caller$a.foo()", Element::named("test1.A.foo"));
    environment.add_resolution(caller, 3, "$local_test1?X?caller$a.foo()", Element::named("test1.B.foo"));
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(
        graph.callees(&reference("test1.X.caller")),
        vec![reference("test1.A.foo"), reference("test1.B.foo")]
    );
}

#[test]
fn chained_calls_resolve_to_the_terminal_method() {
    let code = "class A:\n    def foo(self) -> int:\n        return 1\n\nclass B:\n    def foo(self) -> 'A':\n        return A()\n\ndef caller():\n    return B().foo().foo()\n";
    let source = processed(code, "test2");
    let mut environment = Environment::new();
    environment.add_resolution(
        define_id(&source, "test2.caller"),
        0,
        "test2.B().foo().foo()",
        Element::named("test2.A.foo"),
    );
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(graph.callees(&reference("test2.caller")), vec![reference("test2.A.foo")]);
}

#[test]
fn anonymous_and_value_elements_record_no_edges() {
    let code = "def caller():\n    f()\n    g()\n";
    let source = processed(code, "test");
    let caller = define_id(&source, "test.caller");
    let mut environment = Environment::new();
    environment.add_resolution(caller, 0, "f()", Element::anonymous());
    environment.add_resolution(caller, 1, "g()", Element::Value);
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert!(graph.edges().is_empty());
}

#[test]
fn duplicate_call_sites_collapse_to_one_edge() {
    let code = "def caller():\n    f()\n    f()\n";
    let source = processed(code, "test");
    let caller = define_id(&source, "test.caller");
    let mut environment = Environment::new();
    environment.add_resolution(caller, 0, "f()", Element::named("test.f"));
    environment.add_resolution(caller, 1, "f()", Element::named("test.f"));
    environment.freeze();

    let graph = CallGraph::create(&environment, &source);
    assert_eq!(graph.callees(&reference("test.caller")), vec![reference("test.f")]);
}

#[test]
fn statement_keys_enumerate_nested_blocks_in_pre_order() {
    let code = "def f(x):\n    a = 1\n    if x:\n        b = 2\n    else:\n        c = 3\n    d = 4\n";
    let source = processed(code, "test");
    let statement = defines(&source, true, true, false)
        .into_iter()
        .find(|statement| {
            statement
                .as_define()
                .is_some_and(|define| define.name.to_string() == "test.f")
        })
        .expect("define");
    let define = statement.as_define().expect("define").clone();
    let keys: Vec<(usize, String)> = statement_keys(&define.body)
        .into_iter()
        .map(|(key, statement)| {
            let mut rendered = Source {
                handle: source.handle,
                qualifier: source.qualifier.clone(),
                statements: vec![statement.clone()],
                metadata: source.metadata.clone(),
            }
            .render();
            rendered.truncate(rendered.find('\n').unwrap_or(rendered.len()));
            (key, rendered)
        })
        .collect();
    // Pre-order: the `if` statement itself gets a key, then its body, then
    // the orelse, then the trailing statement and the synthetic return.
    assert_eq!(keys[0].0, 0);
    assert_eq!(keys[1].1, "if $parameter$x:");
    assert_eq!(keys[2].1, "$local_test?f$b = 2");
    assert_eq!(keys[3].1, "$local_test?f$c = 3");
    assert_eq!(keys[4].1, "$local_test?f$d = 4");
    assert_eq!(keys[5].1, "return");
}

#[test]
fn override_map_records_nearest_overrides() {
    let code = "class Foo:\n    def foo(self):\n        pass\n\nclass Bar(Foo):\n    def foo(self):\n        pass\n\nclass Quux(Foo):\n    def foo(self):\n        pass\n\nclass Baz(Bar):\n    def foo(self):\n        pass\n";
    let source = processed(code, "");
    let mut environment = Environment::new();
    environment.index_source(&source);
    environment.freeze();

    let overrides = overrides_of_source(&environment, &source);
    assert_eq!(
        overrides.get(&reference("Foo.foo")),
        Some(&vec![reference("Bar.foo"), reference("Quux.foo")])
    );
    assert_eq!(overrides.get(&reference("Bar.foo")), Some(&vec![reference("Baz.foo")]));
    assert_eq!(overrides.get(&reference("Baz.foo")), None);
    assert_eq!(overrides.get(&reference("Quux.foo")), None);
}

#[test]
fn transitive_overrides_surface_through_the_nearest_parent() {
    let code = "class Foo:\n    def foo(self):\n        pass\n\nclass Middle(Foo):\n    pass\n\nclass Leaf(Middle):\n    def foo(self):\n        pass\n";
    let source = processed(code, "");
    let mut environment = Environment::new();
    environment.index_source(&source);
    environment.freeze();

    let overrides = overrides_of_source(&environment, &source);
    // `Middle` does not redefine `foo`, so the walk descends through it.
    assert_eq!(overrides.get(&reference("Foo.foo")), Some(&vec![reference("Leaf.foo")]));
}

#[test]
fn partition_orders_components_with_no_back_edges() {
    let mut graph = CallGraph::default();
    for (caller, callee) in [
        ("c1", "c2"),
        ("c2", "c1"),
        ("c3", "c4"),
        ("c4", "c3"),
        ("c3", "c1"),
        ("c5", "c5"),
    ] {
        graph.add_edge(reference(caller), reference(callee));
    }

    let partition = graph.partition();
    let as_sets: Vec<Vec<Reference>> = partition.into_iter().map(sorted).collect();
    assert_eq!(
        as_sets,
        vec![
            vec![reference("c3"), reference("c4")],
            vec![reference("c1"), reference("c2")],
            vec![reference("c5")],
        ]
    );
}
