//! Condition sandbox security tests - escape attempts and edge cases
//!
//! Every rejection here must happen at compile time; nothing in this file
//! may reach execution.

use palisade::condition::{parse, ResourceHandler, SubjectHandler};
use palisade::error::ConditionParseError;
use palisade::Bindings;
use std::collections::HashSet;

fn assert_rejected(source: &str) {
    assert!(
        parse(source).is_err(),
        "expected compile-time rejection for {:?}",
        source
    );
}

#[test]
fn test_process_control_rejected() {
    assert_rejected("System.exit(0)");
    assert_rejected("Runtime.exec('ls')");
    assert_rejected("Process.start('sh')");
    assert_rejected("Thread.start()");
}

#[test]
fn test_dynamic_evaluation_rejected() {
    assert_rejected("Eval.me('1')");
    assert_rejected("Script.run('anything')");
    assert_rejected("Shell.eval('true')");
}

#[test]
fn test_execute_method_rejected_on_any_receiver() {
    assert_rejected("'x'.execute()");
    assert_rejected("resource.execute()");
    assert_rejected("subject.attributes('a', 'b').execute()");
}

#[test]
fn test_reflection_rejected() {
    assert_rejected("''.getClass()");
    assert_rejected("Class.forName('java.lang.Runtime')");
    assert_rejected("ClassLoader.load('x')");
    assert_rejected("resource.invoke('anything')");
}

#[test]
fn test_io_rejected() {
    assert_rejected("File.load('/etc/passwd')");
    assert_rejected("Files.size('/etc')");
    assert_rejected("Paths.size('x')");
}

#[test]
fn test_definitions_and_imports_rejected() {
    assert_rejected("import anything");
    assert_rejected("def f() true");
    assert_rejected("class Evil");
    assert_rejected("new Thing()");
}

#[test]
fn test_statements_rejected() {
    assert_rejected("x = 1");
    assert_rejected("true; false");
    assert_rejected("while true");
    assert_rejected("for x");
    assert_rejected("{ true }");
}

#[test]
fn test_unknown_names_rejected() {
    // Anything outside resource/subject/match has no binding and must not
    // silently resolve.
    assert!(matches!(
        parse("context == 'x'"),
        Err(ConditionParseError::UnknownIdentifier(_))
    ));
    assert!(matches!(
        parse("resource.readFile('/etc/passwd')"),
        Err(ConditionParseError::UnknownMethod(_))
    ));
}

#[test]
fn test_resource_exhaustion_bounds() {
    let oversized = format!("'{}'", "x".repeat(4096));
    assert!(matches!(
        parse(&oversized),
        Err(ConditionParseError::TooLong { .. })
    ));

    let deeply_nested = format!("{}true{}", "(".repeat(100), ")".repeat(100));
    assert!(matches!(
        parse(&deeply_nested),
        Err(ConditionParseError::TooDeep { .. })
    ));
}

#[test]
fn test_empty_and_blank_rejected() {
    assert!(matches!(parse(""), Err(ConditionParseError::Empty)));
    assert!(matches!(parse("   \t\n"), Err(ConditionParseError::Empty)));
}

#[test]
fn test_legitimate_conditions_still_compile_and_run() {
    // The sandbox must not break the language it exists to protect.
    let bindings = Bindings::standard(
        ResourceHandler::new("resource", &HashSet::new(), "", None),
        SubjectHandler::new("subject", &HashSet::new()),
    );

    assert!(parse("\"a\".equals(\"a\")")
        .unwrap()
        .execute(&bindings)
        .unwrap());
    assert!(parse("resource != subject")
        .unwrap()
        .execute(&bindings)
        .unwrap());
    assert!(parse("1 < 2 || false")
        .unwrap()
        .execute(&bindings)
        .unwrap());
}

#[test]
fn test_assertion_failure_never_escapes_execution() {
    let bindings = Bindings::standard(
        ResourceHandler::new("resource", &HashSet::new(), "", None),
        SubjectHandler::new("subject", &HashSet::new()),
    );

    // has() on an empty handler fails its assertion; the boundary converts
    // that to false rather than an error.
    let compiled = parse("resource.has('issuer1', 'region')").unwrap();
    assert!(!compiled.execute(&bindings).unwrap());
}
