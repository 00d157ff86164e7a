use rill::{Context, ExcKind, Object, ResourceLimits};

fn execute_err(source: &str) -> rill::Exception {
    Context::new().execute(source).unwrap_err()
}

#[test]
fn unrecognized_character_reports_position() {
    let err = execute_err("var a = 1;\n  @");
    assert_eq!(err.kind(), ExcKind::LexerError);
    assert!(err.message().contains("(line: 2, column: 3)"), "{err}");
}

#[test]
fn unterminated_string_is_lexical() {
    let err = execute_err("var s = 'abc");
    assert_eq!(err.kind(), ExcKind::LexerError);
    assert!(err.message().contains("Unterminated string"), "{err}");
}

#[test]
fn unterminated_comment_is_lexical() {
    let err = execute_err("1; /* never closed");
    assert_eq!(err.kind(), ExcKind::LexerError);
    assert!(err.message().contains("Unterminated block comment"), "{err}");
}

#[test]
fn token_mismatch_names_both_kinds() {
    let err = execute_err("var 1 = 2;");
    assert_eq!(err.kind(), ExcKind::SyntaxError);
    assert!(err.message().contains("Expected Identifier"), "{err}");
    assert!(err.message().contains("got integer value"), "{err}");
}

#[test]
fn missing_operand_is_syntactic() {
    let err = execute_err("1 + ;");
    assert_eq!(err.kind(), ExcKind::SyntaxError);
}

#[test]
fn unterminated_block_is_syntactic() {
    let err = execute_err("{ var x = 1;");
    assert_eq!(err.kind(), ExcKind::SyntaxError);
}

#[test]
fn reserved_words_fail_statement_dispatch() {
    for source in ["break;", "throw 1;", "typeof x;", "new Thing();"] {
        let err = execute_err(source);
        assert_eq!(err.kind(), ExcKind::SyntaxError, "{source}");
        assert!(err.message().contains("Expected <EOS>"), "{source}: {err}");
    }
}

#[test]
fn return_outside_function_fails() {
    let err = execute_err("return 1;");
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("not inside a function"), "{err}");
}

#[test]
fn calling_a_non_function_names_it() {
    let err = execute_err("var x = 5; x();");
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("Expecting 'x' to be a function"), "{err}");
}

#[test]
fn assigning_to_an_unnamed_value_fails() {
    let err = execute_err("5 = 3;");
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("un-named"), "{err}");
}

#[test]
fn named_function_expressions_fail() {
    let err = execute_err("var f = function g() {};");
    assert_eq!(err.kind(), ExcKind::EvalError);
}

#[test]
fn anonymous_function_statements_fail() {
    let err = execute_err("function() {}");
    assert_eq!(err.kind(), ExcKind::EvalError);
}

#[test]
fn non_empty_literals_are_rejected() {
    assert_eq!(execute_err("var o = { a: 1 };").kind(), ExcKind::SyntaxError);
    assert_eq!(execute_err("var a = [1, 2];").kind(), ExcKind::SyntaxError);
}

#[test]
fn division_by_zero_fails() {
    let err = execute_err("1 / 0;");
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("Division by zero"), "{err}");
}

#[test]
fn operator_unsupported_on_type_fails() {
    let err = execute_err("var o; o.x = 1; var p; p.x = 2; o + p;");
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("Object"), "{err}");
}

#[test]
fn removing_a_missing_global_is_a_reference_error() {
    let mut ctx = Context::new();
    let err = ctx.remove_global("nope").unwrap_err();
    assert_eq!(err.kind(), ExcKind::ReferenceError);
}

#[test]
fn runaway_recursion_hits_the_limit() {
    let mut ctx = Context::with_limits(ResourceLimits {
        max_recursion_depth: 64,
        ..ResourceLimits::default()
    });
    let err = ctx.execute("function f() { return f(); } f();").unwrap_err();
    assert_eq!(err.kind(), ExcKind::ResourceError);
}

#[test]
fn default_context_still_bounds_recursion() {
    let err = Context::new()
        .execute("function f() { return f(); } f();")
        .unwrap_err();
    assert_eq!(err.kind(), ExcKind::ResourceError);
}

#[test]
fn allocation_limit_stops_growth() {
    let mut ctx = Context::with_limits(ResourceLimits {
        max_allocations: Some(64),
        ..ResourceLimits::default()
    });
    let err = ctx
        .execute("var a = []; var i = 0; while (i < 10000) { a[i] = i; i = i + 1; }")
        .unwrap_err();
    assert_eq!(err.kind(), ExcKind::ResourceError);
}

#[test]
fn errors_leave_the_context_usable() {
    let mut ctx = Context::new();
    assert!(ctx.execute("1 / 0;").is_err());
    assert_eq!(ctx.evaluate("2 + 2;").unwrap(), Object::Int(4));
}
