use proptest::prelude::*;
use reqjob_core::sandbox::builtin_names;
use reqjob_core::{Context, Engine, EvalError, Mapping, Tagged, Value};

fn eval(source: &str) -> Value {
    Engine::default().evaluate(source).unwrap()
}

fn expr(source: &str) -> Value {
    Value::Tagged(Tagged::Expression(source.to_string()))
}

const FORBIDDEN: &[&str] = &[
    "open",
    "eval",
    "exec",
    "compile",
    "__import__",
    "input",
    "print",
    "globals",
    "locals",
    "vars",
    "dir",
    "help",
    "breakpoint",
    "exit",
    "quit",
    "setattr",
    "delattr",
    "getattr",
    "memoryview",
    "property",
    "classmethod",
    "staticmethod",
    "super",
    "object",
];

#[test]
fn names_outside_the_allow_list_are_not_defined() {
    let engine = Engine::default();
    for name in FORBIDDEN {
        let err = engine.evaluate(name).unwrap_err();
        assert_eq!(err, EvalError::Name(name.to_string()), "{name}");
        let call = engine.evaluate(&format!("{name}('x')")).unwrap_err();
        assert!(matches!(call, EvalError::Name(_)), "{name}: {call:?}");
    }
}

#[test]
fn every_builtin_resolves_to_a_callable() {
    let engine = Engine::default();
    let names: Vec<_> = builtin_names().collect();
    assert!(names.len() >= 40);
    for name in names {
        assert_eq!(
            engine.evaluate(&format!("callable({name})")).unwrap(),
            Value::Bool(true),
            "{name}"
        );
    }
}

#[test]
fn builtins_behave_like_their_namesakes() {
    assert_eq!(eval("abs(-3)"), Value::Int(3));
    assert_eq!(eval("len([1, 2, 3])"), Value::Int(3));
    assert_eq!(eval("list(range(3))"), eval("[0, 1, 2]"));
    assert_eq!(eval("sorted([3, 1, 2])"), eval("[1, 2, 3]"));
    assert_eq!(eval("sum([1, 2, 3.5])"), Value::Float(6.5));
    assert_eq!(eval("max(1, 5, 3)"), Value::Int(5));
    assert_eq!(eval("str(12)"), Value::from("12"));
    assert_eq!(eval("int('ff', 16)"), Value::Int(255));
    assert_eq!(eval("hex(255)"), Value::from("0xff"));
    assert_eq!(eval("round(2.5)"), Value::Int(2));
    assert_eq!(eval("type(1.0)"), Value::from("float"));
    assert_eq!(eval("upper('abc')"), Value::from("ABC"));
    assert_eq!(eval("to_json({'a': [1, None]})"), Value::from(r#"{"a":[1,null]}"#));
    assert_eq!(eval("from_json('{\"a\": true}')"), eval("{'a': True}"));
}

#[test]
fn literals_and_constants() {
    assert_eq!(eval(""), Value::Null);
    assert_eq!(eval("None"), Value::Null);
    assert_eq!(eval("null"), Value::Null);
    assert_eq!(eval("undefined"), Value::Undefined);
    assert_eq!(eval("1"), Value::Int(1));
    assert_eq!(eval("'a'"), Value::from("a"));
    assert_eq!(eval("[1]"), Value::Seq(vec![Value::Int(1)]));
    assert_eq!(eval("{'a': 1}"), [("a", 1)].into_iter().collect::<Value>());
    assert_eq!(eval("{2}"), Value::set_from([Value::Int(2)]));
}

#[test]
fn bindings_are_visible() {
    let cases = [
        ("1 > 0", Context::new(), true),
        ("name == 'bob'", Context::new().with_binding("name", "bob"), true),
        ("name == 'bob'", Context::new().with_binding("name", ""), false),
    ];
    for (source, context, expected) in cases {
        assert_eq!(Engine::new(context).evaluate(source).unwrap(), Value::Bool(expected));
    }
}

#[test]
fn env_lookups_prefer_overrides() {
    let engine = Engine::new(
        Context::new()
            .with_env("REQJOB_TEST_TOKEN", "abc")
            .with_env("PATH", "overridden"),
    );
    assert_eq!(engine.evaluate("env['REQJOB_TEST_TOKEN']").unwrap(), Value::from("abc"));
    assert_eq!(engine.evaluate("env.REQJOB_TEST_TOKEN").unwrap(), Value::from("abc"));
    assert_eq!(engine.evaluate("env['PATH']").unwrap(), Value::from("overridden"));
    assert_eq!(engine.evaluate("env['REQJOB_TEST_MISSING']").unwrap(), Value::Null);
    assert_eq!(
        engine.evaluate("env.get('REQJOB_TEST_MISSING', 'fallback')").unwrap(),
        Value::from("fallback")
    );
}

#[test]
fn recursive_evaluation_rebuilds_containers() {
    let engine = Engine::default();
    let tree: Value = [
        ("a", expr("False")),
        ("b", expr("True")),
        ("c", expr("[1]")),
        ("d", expr("{'e': 3}")),
        ("plain", Value::from("${not a tag}")),
    ]
    .into_iter()
    .collect();
    let expected: Value = [
        ("a", Value::Bool(false)),
        ("b", Value::Bool(true)),
        ("c", Value::Seq(vec![Value::Int(1)])),
        ("d", [("e", 3)].into_iter().collect()),
        ("plain", Value::from("${not a tag}")),
    ]
    .into_iter()
    .collect();
    assert_eq!(engine.evaluate_recursive(&tree).unwrap(), expected);
    assert_eq!(engine.evaluate_recursive(&expr("")).unwrap(), Value::Null);
    assert_eq!(engine.evaluate_recursive(&expr("undefined")).unwrap(), Value::Undefined);
}

#[test]
fn results_that_are_expressions_keep_resolving() {
    let engine = Engine::new(
        Context::new()
            .with_binding("next", expr("last"))
            .with_binding("last", 42),
    );
    assert_eq!(engine.evaluate_recursive(&expr("next")).unwrap(), Value::Int(42));
}

#[test]
fn ref_and_call_tags_pass_through() {
    let engine = Engine::default();
    let call = Value::Tagged(Tagged::AttrRef("reqjob.hooks:debug_request".into()));
    let reference = Value::Tagged(Tagged::Ref("other".into()));
    assert_eq!(engine.evaluate_recursive(&call).unwrap(), call);
    assert_eq!(engine.evaluate_recursive(&reference).unwrap(), reference);
}

#[test]
fn env_entries_bind_in_order() {
    let mut engine = Engine::default();
    let env: Mapping = [
        ("REQJOB_TEST_HOST".to_string(), Value::from("example.com")),
        (
            "REQJOB_TEST_URL".to_string(),
            expr("'https://' + env['REQJOB_TEST_HOST']"),
        ),
        ("REQJOB_TEST_NONE".to_string(), expr("None")),
    ]
    .into_iter()
    .collect();
    engine.bind_env(&env).unwrap();
    assert_eq!(
        engine.context().env("REQJOB_TEST_URL").as_deref(),
        Some("https://example.com")
    );
    assert!(!engine.context().env_overrides().contains_key("REQJOB_TEST_NONE"));
}

#[test]
fn errors_surface_instead_of_defaulting() {
    let engine = Engine::default();
    assert!(matches!(engine.evaluate("1 / 0"), Err(EvalError::ZeroDivision(_))));
    assert!(matches!(engine.evaluate("1 +"), Err(EvalError::Syntax { .. })));
    assert!(matches!(engine.evaluate("'a' + 1"), Err(EvalError::Type(_))));
    assert!(matches!(
        engine.evaluate_recursive(&[("x", expr("missing"))].into_iter().collect()),
        Err(EvalError::Name(_))
    ));
}

fn plain_tree() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        ".{0,8}".prop_map(Value::Str),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Seq),
            prop::collection::vec(("[a-z]{1,5}", inner), 0..4)
                .prop_map(|pairs| pairs.into_iter().collect()),
        ]
    })
}

proptest! {
    #[test]
    fn recursive_evaluation_is_identity_without_tags(tree in plain_tree()) {
        let engine = Engine::default();
        prop_assert_eq!(engine.evaluate_recursive(&tree).unwrap(), tree);
    }
}
