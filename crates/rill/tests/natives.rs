use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use rill::{Context, ExcKind, Exception, Object};

#[test]
fn print_captures_into_host_buffer() {
    let buffer = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&buffer);

    let mut ctx = Context::new();
    ctx.register_native("function print(str)", move |frame| {
        sink.borrow_mut().push_str(&frame.arg_str("str"));
        Ok(())
    })
    .unwrap();

    ctx.execute("print('hi');").unwrap();
    assert_eq!(buffer.borrow().as_str(), "hi");

    ctx.execute("print(40 + 2);").unwrap();
    assert_eq!(buffer.borrow().as_str(), "hi42");
}

#[test]
fn dotted_signatures_create_intermediate_objects() {
    let mut ctx = Context::new();
    ctx.register_native("function math.add(a, b)", |frame| {
        let sum = frame.arg_int("a") + frame.arg_int("b");
        frame.set_return(&Object::Int(sum))
    })
    .unwrap();

    assert_eq!(ctx.evaluate("math.add(2, 3);").unwrap(), Object::Int(5));
    assert_eq!(ctx.evaluate("math.add(math.add(1, 2), 4);").unwrap(), Object::Int(7));
}

#[test]
fn arguments_convert_by_name() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);

    let mut ctx = Context::new();
    ctx.register_native("function probe(i, f, s, b)", move |frame| {
        sink.borrow_mut().push((
            frame.arg_int("i"),
            frame.arg_float("f"),
            frame.arg_str("s"),
            frame.arg_bool("b"),
        ));
        Ok(())
    })
    .unwrap();

    ctx.execute("probe(7, 2.5, 'text', 1);").unwrap();
    assert_eq!(seen.borrow().as_slice(), &[(7, 2.5, "text".to_owned(), true)]);
}

#[test]
fn compound_arguments_round_trip() {
    let mut ctx = Context::new();
    ctx.register_native("function echo(v)", |frame| {
        let value = frame.arg("v");
        frame.set_return(&value)
    })
    .unwrap();

    assert_eq!(
        ctx.evaluate("var o; o.k = 1; echo(o);").unwrap(),
        Object::Map(vec![("k".to_owned(), Object::Int(1))])
    );
    assert_eq!(ctx.evaluate("echo(5) + 1;").unwrap(), Object::Int(6));
}

#[test]
fn missing_arguments_are_undefined() {
    let mut ctx = Context::new();
    ctx.register_native("function peek(x)", |frame| {
        assert_eq!(frame.arg("missing"), Object::Undefined);
        assert_eq!(frame.arg_str("missing"), "undefined");
        frame.set_return(&frame.arg("x"))
    })
    .unwrap();
    assert_eq!(ctx.evaluate("peek(undefined);").unwrap(), Object::Undefined);
}

#[test]
fn method_calls_bind_this() {
    let receiver = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&receiver);

    let mut ctx = Context::new();
    ctx.register_native("function box.describe()", move |frame| {
        *sink.borrow_mut() = frame.this();
        Ok(())
    })
    .unwrap();

    ctx.execute("box.tag = 'T'; box.describe();").unwrap();
    let this = receiver.borrow().clone().expect("this should be bound");
    let Object::Map(pairs) = this else {
        panic!("expected this to be an object, got {this:?}");
    };
    assert!(pairs.iter().any(|(name, value)| name == "tag" && *value == Object::Str("T".to_owned())));
}

#[test]
fn native_errors_propagate() {
    let mut ctx = Context::new();
    ctx.register_native("function boom()", |_frame| {
        Err(Exception::new(ExcKind::EvalError, "boom"))
    })
    .unwrap();

    let err = ctx.execute("boom();").unwrap_err();
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert_eq!(err.message(), "boom");

    // The context stays usable after a native failure.
    assert_eq!(ctx.evaluate("1 + 1;").unwrap(), Object::Int(2));
}

#[test]
fn nested_eval_reenters_the_interpreter() {
    let mut ctx = Context::new();
    ctx.register_native("function bump()", |frame| {
        frame.eval("counter = counter + 1;")?;
        Ok(())
    })
    .unwrap();

    ctx.execute("var counter = 0; bump(); bump();").unwrap();
    assert_eq!(ctx.get_global("counter"), Some(Object::Int(2)));
}

#[test]
fn outer_execution_resumes_after_nested_eval() {
    let mut ctx = Context::new();
    ctx.register_native("function touch()", |frame| {
        frame.eval("a = a + 10;")?;
        Ok(())
    })
    .unwrap();

    assert_eq!(ctx.evaluate("var a = 1; touch(); a = a + 1; a;").unwrap(), Object::Int(12));
}

#[test]
fn recursive_native_invocation_is_rejected() {
    let mut ctx = Context::new();
    ctx.register_native("function r()", |frame| {
        frame.eval("r();")?;
        Ok(())
    })
    .unwrap();

    let err = ctx.execute("r();").unwrap_err();
    assert_eq!(err.kind(), ExcKind::EvalError);
    assert!(err.message().contains("already running"), "{err}");
}

#[test]
fn untaken_branches_never_invoke_natives() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);

    let mut ctx = Context::new();
    ctx.register_native("function observe()", move |frame| {
        *counter.borrow_mut() += 1;
        frame.set_return(&Object::Int(1))
    })
    .unwrap();

    assert_eq!(ctx.evaluate("true ? 1 : observe();").unwrap(), Object::Int(1));
    assert_eq!(*calls.borrow(), 0);

    ctx.execute("false && observe();").unwrap();
    ctx.execute("true || observe();").unwrap();
    assert_eq!(*calls.borrow(), 0);

    ctx.execute("true && observe();").unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn natives_read_globals() {
    let mut ctx = Context::new();
    ctx.set_global("limit", &Object::Int(9)).unwrap();
    ctx.register_native("function readLimit()", |frame| {
        let limit = frame.get_global("limit").unwrap_or(Object::Undefined);
        frame.set_return(&limit)
    })
    .unwrap();
    assert_eq!(ctx.evaluate("readLimit();").unwrap(), Object::Int(9));
}

#[test]
fn script_functions_shadow_nothing_for_natives() {
    // A script function and a native can coexist under different names and
    // call each other through script.
    let mut ctx = Context::new();
    ctx.register_native("function double(x)", |frame| {
        frame.set_return(&Object::Int(frame.arg_int("x") * 2))
    })
    .unwrap();
    assert_eq!(
        ctx.evaluate("function quad(x) { return double(double(x)); } quad(3);").unwrap(),
        Object::Int(12)
    );
}
